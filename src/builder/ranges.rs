use super::download::{DownloadError, Downloader};
use crate::config::{parse_http_uri, ConfigError, RangesConfig};
use crate::geo::range::UnsortedRanges;
use crate::geo::{RangeIngest, UnsortedStrategy};
use crate::kv::{KvStore, StoreError, RANGES_KEY};

use chrono::{DateTime, Utc};
use flate2::read::MultiGzDecoder;
use hyper::body::{Bytes, HttpBody};
use hyper::Uri;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Body chunks buffered between the download and the parser
const CHUNK_QUEUE_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum RangeBuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("Error while reading gzipped CSV stream: {0}")]
    Read(#[from] csv::Error),
    #[error("Range table rejected: {0}")]
    Unsorted(#[from] UnsortedRanges),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Substitute the `{year-month}` placeholder with `now` as `YYYY-MM`
pub fn resolve_url_template(template: &str, now: DateTime<Utc>) -> Result<Uri, ConfigError> {
    let url = template.replace(
        RangesConfig::YEAR_MONTH,
        &now.format("%Y-%m").to_string(),
    );
    parse_http_uri(&url)
}

/// Blocking reader over body chunks sent from the async side
struct ChunkReader {
    receiver: mpsc::Receiver<io::Result<Bytes>>,
    chunk: Bytes,
}

impl ChunkReader {
    fn new(receiver: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            receiver,
            chunk: Bytes::new(),
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.chunk.is_empty() {
            match self.receiver.blocking_recv() {
                Some(chunk) => self.chunk = chunk?,
                None => return Ok(0),
            }
        }
        let len = buf.len().min(self.chunk.len());
        buf[..len].copy_from_slice(&self.chunk.split_to(len));
        Ok(len)
    }
}

/// Downloads the IPv4 range CSV and persists it as a sorted range table
pub struct RangeTableBuilder {
    kv: Arc<dyn KvStore>,
    downloader: Downloader,
    url_template: String,
    timeout: Duration,
    unsorted: UnsortedStrategy,
}

impl RangeTableBuilder {
    pub fn from_config(
        config: &RangesConfig,
        kv: Arc<dyn KvStore>,
        downloader: Downloader,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            kv,
            downloader,
            url_template: config.url_template()?.to_owned(),
            timeout: config.timeout.into(),
            unsorted: config.unsorted,
        })
    }

    /// Returns the number of persisted ranges. On error the store is left untouched.
    pub async fn build(&self) -> Result<usize, RangeBuildError> {
        let result = self.try_build().await;
        if let Err(error) = &result {
            log::error!("range table build failed: {error}");
        }
        result
    }

    async fn try_build(&self) -> Result<usize, RangeBuildError> {
        let uri = resolve_url_template(&self.url_template, Utc::now())?;
        log::info!(r#"downloading IPv4 ranges from "{uri}""#);

        let ingest = tokio::time::timeout(self.timeout, self.download(uri))
            .await
            .map_err(|_| RangeBuildError::Timeout(self.timeout))??;
        let dropped = ingest.warnings.len();
        let skipped_ipv6 = ingest.skipped_ipv6;
        for warning in &ingest.warnings {
            log::warn!("{warning}");
        }

        let ranges = ingest.into_sorted(self.unsorted)?;
        let count = ranges.len();
        log::info!("{count} IPv4 ranges kept, {dropped} invalid rows dropped, {skipped_ipv6} IPv6 rows skipped");

        let blob = serde_json::to_vec(&ranges)?;
        let kv = self.kv.clone();
        tokio::task::spawn_blocking(move || kv.set(RANGES_KEY, blob)).await??;
        log::info!(r#"range table stored under "{RANGES_KEY}""#);
        Ok(count)
    }

    /// Body chunks are fed to a blocking gunzip + CSV parser as they arrive
    async fn download(&self, uri: Uri) -> Result<RangeIngest, RangeBuildError> {
        let mut body = self.downloader.get(uri).await?.into_body();
        let (sender, receiver) = mpsc::channel(CHUNK_QUEUE_SIZE);
        let parser = tokio::task::spawn_blocking(move || {
            RangeIngest::from_csv_reader(MultiGzDecoder::new(ChunkReader::new(receiver)))
        });
        while let Some(chunk) = body.data().await {
            let chunk = chunk.map_err(|error| io::Error::new(io::ErrorKind::Other, error));
            let failed = chunk.is_err();
            // Parser has stopped on its own error, which it reports below
            if sender.send(chunk).await.is_err() || failed {
                break;
            }
        }
        drop(sender);
        Ok(parser.await??)
    }
}
