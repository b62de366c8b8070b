//! Durable key-value stores holding the serialized range table and country map.

use enum_dispatch::enum_dispatch;
use serde::Deserialize;
use std::collections::HashMap;
#[cfg(feature = "sled")]
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

pub const RANGES_KEY: &str = "geolocation:ranges";
pub const COUNTRIES_KEY: &str = "geolocation:countries";

#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "sled")]
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error("memory store lock is poisoned")]
    Poisoned,
}

/// Values are kept until overwritten, there is no expiry
#[enum_dispatch(Store)]
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

#[enum_dispatch]
pub enum Store {
    Memory(MemoryStore),
    #[cfg(feature = "sled")]
    Sled(SledStore),
}

/// Process-local store, contents are lost on exit
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self.map.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut map = self.map.write().map_err(|_| StoreError::Poisoned)?;
        map.insert(key.to_owned(), value);
        Ok(())
    }
}

#[cfg(feature = "sled")]
pub struct SledStore {
    db: sled::Db,
}

#[cfg(feature = "sled")]
impl SledStore {
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }
}

#[cfg(feature = "sled")]
impl KvStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|ivec| ivec.to_vec()))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.db.insert(key, value)?;
        self.db.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
#[serde(deny_unknown_fields)]
pub enum StoreConfig {
    #[serde(alias = "memory")]
    Memory,
    #[cfg(feature = "sled")]
    #[serde(alias = "sled")]
    Sled {
        #[serde(default = "StoreConfig::default_sled_path")]
        path: PathBuf,
    },
}

impl StoreConfig {
    #[cfg(feature = "sled")]
    fn default_sled_path() -> PathBuf {
        "ipgeo.sled".into()
    }

    pub fn open(&self) -> Result<Store, StoreError> {
        match self {
            Self::Memory => Ok(MemoryStore::new().into()),
            #[cfg(feature = "sled")]
            Self::Sled { path } => Ok(SledStore::open(path)?.into()),
        }
    }
}

impl Default for StoreConfig {
    #[cfg(feature = "sled")]
    fn default() -> Self {
        Self::Sled {
            path: Self::default_sled_path(),
        }
    }

    #[cfg(not(feature = "sled"))]
    fn default() -> Self {
        Self::Memory
    }
}
