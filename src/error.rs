use thiserror::Error;

/// Errors that can occur while interacting with the cache and its backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend holds no entry for the requested key.
    #[error("key not found")]
    NotFound,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A bounded backend refused to admit the entry.
    #[error("write dropped for key `{key}`")]
    WriteDropped { key: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[cfg(feature = "rocksdb-backend")]
    #[error(transparent)]
    RocksDb(#[from] rocksdb::Error),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound)
    }

    pub fn is_write_dropped(&self) -> bool {
        matches!(self, CacheError::WriteDropped { .. })
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        CacheError::Config(message.into())
    }
}
