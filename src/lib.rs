//! Tower Edge Cache
//! ==================
//!
//! `tower-edge-cache` is a shared HTTP response cache for Tower services.
//! It stores cacheable `GET` responses in a swappable backend (a volatile
//! map, an embedded RocksDB database or a bounded moka cache), replays them
//! while their `s-maxage` lasts and lets trusted callers evict entries with
//! the `PURGE` method.
//!
//! ```no_run
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use tower_edge_cache::prelude::*;
//!
//! # async fn run() -> Result<(), tower_edge_cache::layer::BoxError> {
//! let layer = CacheLayer::builder(InMemoryBackend::new(64 * 1024 * 1024))
//!     .purge_acl(PurgeAcl::new(["127.0.0.1", "10.0.0.0/8"])?)
//!     .build();
//!
//! let mut svc = ServiceBuilder::new()
//!     .layer(layer)
//!     .service(tower::service_fn(|_req: http::Request<()>| async {
//!         let response = http::Response::builder()
//!             .header("cache-control", "public, s-maxage=60")
//!             .body(http_body_util::Full::from("ok"))?;
//!         Ok::<_, http::Error>(response)
//!     }));
//!
//! let response = svc
//!     .ready()
//!     .await?
//!     .call(http::Request::get("http://wiki.example.org/wiki/Main_Page").body(())?)
//!     .await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod freshness;
pub mod key;
pub mod layer;
pub mod logging;
pub mod policy;
pub mod prelude;
pub mod purge;

pub use config::CacheConfig;
pub use error::CacheError;
pub use layer::{CacheLayer, CacheLayerBuilder, CacheService};
pub use logging::{CacheEvent, CacheEventType, LoggingConfig};
