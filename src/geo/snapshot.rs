use crate::geo::lookup::{self, LookupError};
use crate::geo::range::{first_unsorted, ipv4_to_number};
use crate::geo::{Country, CountryCode, IpRange};
use crate::kv::{KvStore, StoreError, COUNTRIES_KEY, RANGES_KEY};

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Ranges and countries from the same load, never mutated after assembly
#[derive(Debug, Default, Clone)]
pub struct GeolocationSnapshot {
    pub ranges: Vec<IpRange>,
    pub countries: HashMap<CountryCode, Country>,
}

#[derive(Error, Debug)]
enum BlobReadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stored value is corrupted: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store read task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Owner of the current [GeolocationSnapshot].
///
/// [GeolocationStore::load] swaps the whole snapshot at once, readers holding the previous one
/// keep using it until they drop it.
pub struct GeolocationStore {
    kv: Arc<dyn KvStore>,
    current: ArcSwap<GeolocationSnapshot>,
}

impl GeolocationStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            current: ArcSwap::from_pointee(GeolocationSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<GeolocationSnapshot> {
        self.current.load_full()
    }

    pub fn resolve_country(&self, ip: &str) -> Result<Country, LookupError> {
        let ip_number = ipv4_to_number(ip).ok_or(LookupError::Ipv4Required)?;
        lookup::resolve_number(&self.current.load(), ip_number)
    }

    /// Read both blobs and replace the snapshot.
    ///
    /// A blob which is absent, unreadable or corrupted yields an empty half, this never fails.
    pub async fn load(&self) {
        let (ranges, countries) = tokio::join!(
            read_blob::<Vec<IpRange>>(self.kv.clone(), RANGES_KEY),
            read_blob::<HashMap<CountryCode, Country>>(self.kv.clone(), COUNTRIES_KEY),
        );
        let mut ranges = ranges.unwrap_or_default();
        if let Some(error) = first_unsorted(&ranges) {
            log::warn!("stored range table is not sorted ({error}), sorting it");
            ranges.sort_by_key(|range| range.start_ip);
        }
        let snapshot = GeolocationSnapshot {
            ranges,
            countries: countries.unwrap_or_default(),
        };
        log::info!(
            "geolocation snapshot loaded: {} ranges, {} countries",
            snapshot.ranges.len(),
            snapshot.countries.len()
        );
        self.current.store(Arc::new(snapshot));
    }
}

async fn read_blob<T>(kv: Arc<dyn KvStore>, key: &'static str) -> Option<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || -> Result<Option<T>, BlobReadError> {
        match kv.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    })
    .await
    .map_err(BlobReadError::from)
    .and_then(|result| result);
    match result {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            log::warn!(r#"key "{key}" is absent from the store, treating it as empty"#);
            None
        }
        Err(error) => {
            log::warn!(r#"cannot read key "{key}" from the store, treating it as empty: {error}"#);
            None
        }
    }
}
