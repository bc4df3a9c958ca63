//! Declarative configuration for the cache layer.
//!
//! A [`CacheConfig`] is typically deserialized from JSON and turned into a
//! ready [`CacheLayer`](crate::layer::CacheLayer) with
//! [`CacheLayer::from_config`](crate::layer::CacheLayer::from_config):
//!
//! ```no_run
//! use tower_edge_cache::config::CacheConfig;
//! use tower_edge_cache::CacheLayer;
//!
//! # fn run() -> Result<(), tower_edge_cache::error::CacheError> {
//! let config = CacheConfig::from_json(
//!     r#"{ "backend": "moka", "backend_options": { "max_capacity": "1048576" } }"#,
//! )?;
//! let layer = CacheLayer::from_config(&config)?;
//! # drop(layer);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::backend::{AnyBackend, BackendKind};
use crate::error::CacheError;
use crate::purge::PurgeAcl;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: BackendKind,
    /// Raw backend options; names are normalized and checked against the
    /// selected backend's schema.
    pub backend_options: HashMap<String, String>,
    /// Addresses and CIDR blocks allowed to purge.
    pub purge_acl: Vec<String>,
    pub coalesce_misses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            backend_options: HashMap::new(),
            purge_acl: vec!["127.0.0.1".to_owned()],
            coalesce_misses: false,
        }
    }
}

impl CacheConfig {
    pub fn from_json(input: &str) -> Result<Self, CacheError> {
        serde_json::from_str(input)
            .map_err(|err| CacheError::config(format!("malformed cache config: {err}")))
    }

    /// Checks the whole configuration without opening the backend.
    pub fn validate(&self) -> Result<(), CacheError> {
        self.purge_acl()?;
        self.backend.validate_options(&self.backend_options)
    }

    /// Parses the purge ACL. An empty list is rejected.
    pub fn purge_acl(&self) -> Result<PurgeAcl, CacheError> {
        if self.purge_acl.is_empty() {
            return Err(CacheError::config("no purge acl"));
        }
        PurgeAcl::new(&self.purge_acl)
    }

    /// Validates the configuration and opens the selected backend.
    pub fn build_backend(&self) -> Result<AnyBackend, CacheError> {
        self.validate()?;
        let backend = self.backend.open(&self.backend_options)?;
        tracing::debug!(backend = %self.backend, "cache backend opened");
        Ok(backend)
    }
}
