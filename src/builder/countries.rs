use super::download::{DownloadError, Downloader};
use crate::config::{ConfigError, CountriesConfig};
use crate::geo::{Country, CountryCode, Region};
use crate::kv::{KvStore, StoreError, COUNTRIES_KEY};

use hyper::Uri;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CountryBuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("Country list has unexpected shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error(r#"Country code "{0}" is listed more than once"#)]
    DuplicateCode(CountryCode),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Upstream record, e.g. `{"name": {"common": "France"}, "cca2": "FR", "region": "Europe"}`
#[derive(Deserialize)]
struct CountryRecord {
    name: CountryName,
    cca2: CountryCode,
    region: Region,
}

#[derive(Deserialize)]
struct CountryName {
    common: String,
}

/// Validate the whole list, any bad record rejects it
pub fn parse_countries(json: &[u8]) -> Result<HashMap<CountryCode, Country>, CountryBuildError> {
    let records: Vec<CountryRecord> = serde_json::from_slice(json)?;
    let mut countries = HashMap::with_capacity(records.len());
    for record in records {
        let country = Country {
            code: record.cca2,
            name: record.name.common,
            region: record.region,
        };
        if let Some(previous) = countries.insert(country.code.clone(), country) {
            return Err(CountryBuildError::DuplicateCode(previous.code));
        }
    }
    Ok(countries)
}

/// Downloads the country list and persists the code-to-country map
pub struct CountryMetadataBuilder {
    kv: Arc<dyn KvStore>,
    downloader: Downloader,
    uri: Uri,
    timeout: Duration,
}

impl CountryMetadataBuilder {
    pub fn from_config(
        config: &CountriesConfig,
        kv: Arc<dyn KvStore>,
        downloader: Downloader,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            kv,
            downloader,
            uri: config.uri()?,
            timeout: config.timeout.into(),
        })
    }

    /// Returns the number of persisted countries. On error the store is left untouched.
    pub async fn build(&self) -> Result<usize, CountryBuildError> {
        let result = self.try_build().await;
        if let Err(error) = &result {
            log::error!("country metadata build failed: {error}");
        }
        result
    }

    async fn try_build(&self) -> Result<usize, CountryBuildError> {
        log::info!(r#"downloading country list from "{}""#, self.uri);
        let body = tokio::time::timeout(self.timeout, self.downloader.bytes(self.uri.clone()))
            .await
            .map_err(|_| CountryBuildError::Timeout(self.timeout))??;
        let countries = parse_countries(&body)?;
        let count = countries.len();

        let blob = serde_json::to_vec(&countries)?;
        let kv = self.kv.clone();
        tokio::task::spawn_blocking(move || kv.set(COUNTRIES_KEY, blob)).await??;
        log::info!(r#"{count} countries stored under "{COUNTRIES_KEY}""#);
        Ok(count)
    }
}
