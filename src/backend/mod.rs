//! Storage backends for the cache layer.
//!
//! The cache layer persists encoded artifacts through a [`CacheBackend`]
//! implementation. This module ships with:
//! - [`map::MapBackend`]: an unbounded, volatile `HashMap` behind a lock.
//! - `rocksdb::RocksDbBackend` *(default `rocksdb-backend` feature)*: a
//!   disk-backed store where every operation runs in its own transaction.
//! - [`memory::InMemoryBackend`]: a bounded cache backed by [`moka`] that
//!   evicts under pressure and may refuse writes.
//!
//! All backends store opaque bytes and answer the same three verbs. A miss
//! is reported as [`CacheError::NotFound`] regardless of whether the key was
//! never written, deleted, or evicted.

pub mod map;
pub mod memory;
pub mod options;
#[cfg(feature = "rocksdb-backend")]
pub mod rocksdb;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

pub use map::MapBackend;
pub use memory::InMemoryBackend;
#[cfg(feature = "rocksdb-backend")]
pub use self::rocksdb::RocksDbBackend;

#[async_trait]
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Fetches the stored bytes for `key`.
    ///
    /// Returns [`CacheError::NotFound`] when the backend has no value.
    async fn get(&self, key: &str) -> Result<Bytes, CacheError>;
    /// Stores `value` under `key`, replacing any previous value atomically.
    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError>;
    /// Removes `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Identifier used by configuration to select a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Map,
    #[serde(rename = "rocksdb")]
    RocksDb,
    #[default]
    Moka,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Map => "map",
            BackendKind::RocksDb => "rocksdb",
            BackendKind::Moka => "moka",
        }
    }

    /// Checks option names against the backend's schema without opening it.
    pub fn validate_options(&self, raw: &HashMap<String, String>) -> Result<(), CacheError> {
        match self {
            BackendKind::Map => options::validate_names(self.as_str(), raw, map::OPTION_FIELDS),
            BackendKind::Moka => {
                options::validate_names(self.as_str(), raw, memory::OPTION_FIELDS)
            }
            #[cfg(feature = "rocksdb-backend")]
            BackendKind::RocksDb => {
                options::validate_names(self.as_str(), raw, self::rocksdb::OPTION_FIELDS)
            }
            #[cfg(not(feature = "rocksdb-backend"))]
            BackendKind::RocksDb => Err(CacheError::config(
                "backend `rocksdb` requires the `rocksdb-backend` feature",
            )),
        }
    }

    /// Validates `raw` and opens the selected backend.
    pub fn open(&self, raw: &HashMap<String, String>) -> Result<AnyBackend, CacheError> {
        self.validate_options(raw)?;
        let backend = match self {
            BackendKind::Map => AnyBackend::Map(MapBackend::new()),
            BackendKind::Moka => {
                let opts = options::parse(self.as_str(), raw, memory::OPTION_FIELDS)?;
                AnyBackend::Moka(InMemoryBackend::with_options(opts))
            }
            #[cfg(feature = "rocksdb-backend")]
            BackendKind::RocksDb => {
                let opts = options::parse(self.as_str(), raw, self::rocksdb::OPTION_FIELDS)?;
                AnyBackend::RocksDb(RocksDbBackend::open(opts)?)
            }
            #[cfg(not(feature = "rocksdb-backend"))]
            BackendKind::RocksDb => {
                return Err(CacheError::config(
                    "backend `rocksdb` requires the `rocksdb-backend` feature",
                ))
            }
        };
        Ok(backend)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of backends a configuration can select.
#[derive(Clone)]
pub enum AnyBackend {
    Map(MapBackend),
    #[cfg(feature = "rocksdb-backend")]
    RocksDb(RocksDbBackend),
    Moka(InMemoryBackend),
}

impl AnyBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            AnyBackend::Map(_) => BackendKind::Map,
            #[cfg(feature = "rocksdb-backend")]
            AnyBackend::RocksDb(_) => BackendKind::RocksDb,
            AnyBackend::Moka(_) => BackendKind::Moka,
        }
    }
}

impl fmt::Debug for AnyBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyBackend").field(&self.kind()).finish()
    }
}

#[async_trait]
impl CacheBackend for AnyBackend {
    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        match self {
            AnyBackend::Map(backend) => backend.get(key).await,
            #[cfg(feature = "rocksdb-backend")]
            AnyBackend::RocksDb(backend) => backend.get(key).await,
            AnyBackend::Moka(backend) => backend.get(key).await,
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        match self {
            AnyBackend::Map(backend) => backend.put(key, value).await,
            #[cfg(feature = "rocksdb-backend")]
            AnyBackend::RocksDb(backend) => backend.put(key, value).await,
            AnyBackend::Moka(backend) => backend.put(key, value).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self {
            AnyBackend::Map(backend) => backend.delete(key).await,
            #[cfg(feature = "rocksdb-backend")]
            AnyBackend::RocksDb(backend) => backend.delete(key).await,
            AnyBackend::Moka(backend) => backend.delete(key).await,
        }
    }
}
