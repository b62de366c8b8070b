use crate::config::Config;
use crate::geo::GeolocationStore;
use crate::header_tools::remote_ip;

use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{header::HeaderMap, Body, Method, Request, Response, StatusCode};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

pub const GEOLOCATION_PATH: &str = "/geolocation";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(r#"Internal server error: "{0:?}""#)]
    InternalServerError(#[from] hyper::http::Error),
    #[error(r#"Cannot serialize country: "{0}""#)]
    Json(#[from] serde_json::Error),
}

pub struct GeolocationService {
    ip_headers: Vec<String>,
    ip_headers_recursive: bool,
    response_headers: HeaderMap,
    store: Arc<GeolocationStore>,
}

impl GeolocationService {
    pub fn from_config(config: &Config, store: Arc<GeolocationStore>) -> Self {
        Self {
            ip_headers: config.ip_headers.clone(),
            ip_headers_recursive: config.ip_headers_recursive,
            response_headers: config.response_headers.clone(),
            store,
        }
    }

    pub fn response(
        &self,
        socket_ip_addr: IpAddr,
        request: &Request<Body>,
    ) -> Result<Response<Body>, ServiceError> {
        let mut response = if request.uri().path() != GEOLOCATION_PATH {
            text_response(StatusCode::NOT_FOUND, "not found")?
        } else if *request.method() != Method::GET {
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")?;
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET"));
            response
        } else {
            let ip = remote_ip(
                request.headers(),
                &self.ip_headers,
                self.ip_headers_recursive,
                socket_ip_addr,
            );
            match self.store.resolve_country(&ip) {
                Ok(country) => Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, "application/json")
                    .body(serde_json::to_vec(&country)?.into())?,
                Err(error) => text_response(StatusCode::NOT_FOUND, &error.to_string())?,
            }
        };
        let headers = response.headers_mut();
        for (name, value) in &self.response_headers {
            headers.insert(name, value.clone());
        }
        Ok(response)
    }
}

fn text_response(status: StatusCode, text: &str) -> Result<Response<Body>, hyper::http::Error> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(text.to_owned().into())
}

pub fn make_error_response(error: ServiceError) -> Response<Body> {
    log::error!("{error}");
    let mut response = Response::new(Body::from("internal server error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

pub fn log_response(socket_ip_addr: IpAddr, request: &Request<Body>, response: &Response<Body>) {
    log::info!(
        "{} {} {} {}",
        socket_ip_addr,
        request.method(),
        request.uri(),
        response.status(),
    );
}
