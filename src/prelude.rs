//! Re-exports for consumers who prefer a single import.
//!
//! ```no_run
//! use tower_edge_cache::prelude::*;
//! let layer = CacheLayer::builder(MapBackend::new())
//!     .coalesce_misses(true)
//!     .build();
//! # drop(layer);
//! ```

pub use crate::backend::memory::{InMemoryBackend, InMemoryOptions};
#[cfg(feature = "rocksdb-backend")]
pub use crate::backend::rocksdb::{RocksDbBackend, RocksDbOptions};
pub use crate::backend::{AnyBackend, BackendKind, CacheBackend, MapBackend};
pub use crate::capture::{check_response, UncacheableReason};
pub use crate::codec::CachedArtifact;
pub use crate::config::CacheConfig;
pub use crate::error::CacheError;
pub use crate::freshness::{is_fresh, Clock};
pub use crate::key::{derive_key, derive_key_from_parts, KeyExtractor};
pub use crate::layer::{CacheLayer, CacheLayerBuilder};
pub use crate::logging::{CacheEvent, CacheEventType, LoggingConfig};
pub use crate::policy::{is_cacheable, CachePolicy};
pub use crate::purge::{cidr_contains, ClientAddr, PurgeAcl};
