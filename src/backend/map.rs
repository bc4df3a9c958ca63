use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::options::OptionField;
use super::CacheBackend;
use crate::error::CacheError;

/// The map backend has no tunables.
pub(crate) const OPTION_FIELDS: &[OptionField<()>] = &[];

/// An unbounded, process-local [`CacheBackend`] backed by a `HashMap`.
///
/// Nothing is ever evicted, so memory grows with the number of distinct
/// keys, and everything is lost when the process exits. Clones share the
/// same map.
#[derive(Clone, Default)]
pub struct MapBackend {
    entries: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MapBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MapBackend {
    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(CacheError::NotFound)
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
