use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;

use super::options::{OptionField, Setter};
use super::CacheBackend;
use crate::error::CacheError;

const DEFAULT_MAX_CAPACITY: u64 = 64 * 1024 * 1024;

/// Tunables for [`InMemoryBackend`], named after moka's builder methods.
#[derive(Debug, Clone)]
pub struct InMemoryOptions {
    /// Total weight budget in bytes (key length + value length per entry).
    pub max_capacity: u64,
    pub initial_capacity: Option<usize>,
    pub time_to_live: Option<Duration>,
    pub time_to_idle: Option<Duration>,
}

impl Default for InMemoryOptions {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_MAX_CAPACITY,
            initial_capacity: None,
            time_to_live: None,
            time_to_idle: None,
        }
    }
}

pub(crate) const OPTION_FIELDS: &[OptionField<InMemoryOptions>] = &[
    OptionField {
        name: "max_capacity",
        setter: Setter::U64(|o, v| o.max_capacity = v),
    },
    OptionField {
        name: "initial_capacity",
        setter: Setter::Usize(|o, v| o.initial_capacity = Some(v)),
    },
    OptionField {
        name: "time_to_live",
        setter: Setter::U64(|o, v| o.time_to_live = Some(Duration::from_secs(v))),
    },
    OptionField {
        name: "time_to_idle",
        setter: Setter::U64(|o, v| o.time_to_idle = Some(Duration::from_secs(v))),
    },
];

/// A bounded in-memory [`CacheBackend`] implementation backed by [`moka`].
///
/// Entries are weighted by their byte size and evicted according to moka's
/// TinyLFU admission policy once `max_capacity` is reached. An entry that can
/// never fit is refused with [`CacheError::WriteDropped`].
///
/// The backend is cheap to clone and shares a single underlying cache.
#[derive(Clone)]
pub struct InMemoryBackend {
    cache: Cache<String, Bytes>,
    max_capacity: u64,
}

impl InMemoryBackend {
    /// Creates a new cache holding at most `max_capacity` bytes.
    pub fn new(max_capacity: u64) -> Self {
        Self::with_options(InMemoryOptions {
            max_capacity,
            ..InMemoryOptions::default()
        })
    }

    pub fn with_options(opts: InMemoryOptions) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(opts.max_capacity)
            .weigher(|key: &String, value: &Bytes| weight(key, value));
        if let Some(initial) = opts.initial_capacity {
            builder = builder.initial_capacity(initial);
        }
        if let Some(ttl) = opts.time_to_live {
            builder = builder.time_to_live(ttl);
        }
        if let Some(tti) = opts.time_to_idle {
            builder = builder.time_to_idle(tti);
        }

        Self {
            cache: builder.build(),
            max_capacity: opts.max_capacity,
        }
    }

    /// Applies pending evictions. Mostly useful in tests.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

fn weight(key: &str, value: &Bytes) -> u32 {
    u32::try_from(key.len().saturating_add(value.len())).unwrap_or(u32::MAX)
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        self.cache.get(key).await.ok_or(CacheError::NotFound)
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        if u64::from(weight(key, &value)) > self.max_capacity {
            return Err(CacheError::WriteDropped {
                key: key.to_owned(),
            });
        }
        self.cache.insert(key.to_owned(), value).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
