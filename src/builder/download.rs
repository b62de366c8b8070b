use hyper::body::{Body, Bytes};
use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, LOCATION};
use hyper::http::uri::Uri;
use hyper::{Client, Request, Response, StatusCode};
use hyper_tls::HttpsConnector;
use thiserror::Error;

const MAX_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    #[error(transparent)]
    Http(#[from] hyper::http::Error),
    #[error("Non-success status code: {0}")]
    NonSuccess(StatusCode),
    #[error("Redirect {0} without a usable Location header")]
    BadRedirect(StatusCode),
    #[error(r#"Too many redirects, last location is "{0}""#)]
    TooManyRedirects(Uri),
}

/// HTTP(S) GET client shared by the dataset builders
#[derive(Clone)]
pub struct Downloader {
    client: Client<HttpsConnector<HttpConnector>>,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    pub fn new() -> Self {
        let https = HttpsConnector::new();
        Self {
            client: Client::builder().build::<_, Body>(https),
        }
    }

    /// Successful response to a GET request, redirects are followed
    pub async fn get(&self, mut uri: Uri) -> Result<Response<Body>, DownloadError> {
        for _ in 0..MAX_ATTEMPTS {
            let request = Request::get(&uri).body(Body::empty())?;
            let response = self.client.request(request).await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            } else if status.is_redirection() {
                uri = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|location| redirect_target(&uri, location))
                    .ok_or(DownloadError::BadRedirect(status))?;
                log::debug!(r#"redirected to "{uri}""#);
            } else {
                return Err(DownloadError::NonSuccess(status));
            }
        }
        Err(DownloadError::TooManyRedirects(uri))
    }

    pub async fn bytes(&self, uri: Uri) -> Result<Bytes, DownloadError> {
        let body = self.get(uri).await?.into_body();
        Ok(hyper::body::to_bytes(body).await?)
    }
}

/// Location may be relative to the current URI
fn redirect_target(base: &Uri, location: &HeaderValue) -> Option<Uri> {
    let target: Uri = location.to_str().ok()?.parse().ok()?;
    if target.authority().is_some() {
        return Some(target);
    }
    let mut parts = target.into_parts();
    parts.scheme = base.scheme().cloned();
    parts.authority = base.authority().cloned();
    Uri::from_parts(parts).ok()
}
