//! Structured logging of cache decisions.
//!
//! Every decision the layer takes (hit, miss, store, purge, ...) can be
//! emitted as a single JSON event on the `tower_edge_cache::events` tracing
//! target. Cache keys may be hashed so full URLs stay out of the logs.

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime};
use tracing::Level;

const EVENTS_TARGET: &str = "tower_edge_cache::events";

/// Configuration for structured event logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Emit cache events.
    pub enabled: bool,

    /// Hash cache keys with SHA-256 before logging them.
    pub hash_keys: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hash_keys: false,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_hash_keys(mut self, hash: bool) -> Self {
        self.hash_keys = hash;
        self
    }
}

/// Types of cache events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventType {
    /// Fresh entry replayed
    Hit,
    /// No entry for the key
    Miss,
    /// Entry found but past its s-maxage
    Stale,
    /// Response written to the backend
    Store,
    /// Response served but failed the capture checks
    Uncacheable,
    /// Backend refused the write
    WriteDropped,
    Purge,
    PurgeDenied,
    /// Request forwarded without consulting the cache
    Bypass,
}

impl CacheEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEventType::Hit => "hit",
            CacheEventType::Miss => "miss",
            CacheEventType::Stale => "stale",
            CacheEventType::Store => "store",
            CacheEventType::Uncacheable => "uncacheable",
            CacheEventType::WriteDropped => "write_dropped",
            CacheEventType::Purge => "purge",
            CacheEventType::PurgeDenied => "purge_denied",
            CacheEventType::Bypass => "bypass",
        }
    }
}

/// A single cache decision.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub timestamp: SystemTime,
    pub event_type: CacheEventType,
    pub key: String,
    pub method: Option<Method>,
    pub status: Option<StatusCode>,
    pub latency_us: Option<u64>,
    pub size_bytes: Option<usize>,
    /// Free-form detail such as an uncacheable reason or caller address.
    pub detail: Option<String>,
}

impl CacheEvent {
    pub fn new(event_type: CacheEventType, key: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            key: key.into(),
            method: None,
            status: None,
            latency_us: None,
            size_bytes: None,
            detail: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_us = Some(latency.as_micros() as u64);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size_bytes = Some(size);
        self
    }

    pub fn with_detail(mut self, detail: impl ToString) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// Renders the event as the JSON object that gets logged.
    pub fn to_json(&self, config: &LoggingConfig) -> serde_json::Value {
        let key = if config.hash_keys {
            hash_key(&self.key)
        } else {
            self.key.clone()
        };
        let timestamp_ms = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        json!({
            "timestamp_ms": timestamp_ms,
            "event": self.event_type,
            "key": key,
            "method": self.method.as_ref().map(|m| m.as_str()),
            "status": self.status.map(|s| s.as_u16()),
            "latency_us": self.latency_us,
            "size_bytes": self.size_bytes,
            "detail": self.detail,
        })
    }

    /// Level the event is logged at.
    pub fn level(&self) -> Level {
        match self.event_type {
            CacheEventType::WriteDropped => Level::WARN,
            CacheEventType::Purge | CacheEventType::PurgeDenied | CacheEventType::Store => {
                Level::INFO
            }
            _ => Level::DEBUG,
        }
    }

    /// Logs this event using the provided configuration.
    ///
    /// Nothing is serialized unless a subscriber accepts the event's level
    /// on the events target.
    pub fn log(&self, config: &LoggingConfig) {
        let level = self.level();
        if !config.enabled || !events_enabled(level) {
            return;
        }
        let data = self.to_json(config);
        if level == Level::WARN {
            tracing::warn!(target: EVENTS_TARGET, event = %data);
        } else if level == Level::INFO {
            tracing::info!(target: EVENTS_TARGET, event = %data);
        } else {
            tracing::debug!(target: EVENTS_TARGET, event = %data);
        }
    }
}

fn events_enabled(level: Level) -> bool {
    if level == Level::WARN {
        tracing::enabled!(target: EVENTS_TARGET, Level::WARN)
    } else if level == Level::INFO {
        tracing::enabled!(target: EVENTS_TARGET, Level::INFO)
    } else {
        tracing::enabled!(target: EVENTS_TARGET, Level::DEBUG)
    }
}

/// Hashes a cache key using SHA-256.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_config_default() {
        let config = LoggingConfig::default();
        assert!(config.enabled);
        assert!(!config.hash_keys);
    }

    #[test]
    fn hash_key_consistent() {
        let key = "wiki.example.org/wiki/Main_Page";
        let hash1 = hash_key(key);
        let hash2 = hash_key(key);
        assert_eq!(hash1, hash2);
        assert_ne!(hash1, key);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn event_json_carries_fields() {
        let event = CacheEvent::new(CacheEventType::Uncacheable, "/page?x=1")
            .with_method(Method::GET)
            .with_status(StatusCode::OK)
            .with_size(12)
            .with_latency(Duration::from_micros(150))
            .with_detail("set-cookie present");

        let json = event.to_json(&LoggingConfig::default());
        assert_eq!(json["event"], "uncacheable");
        assert_eq!(json["key"], "/page?x=1");
        assert_eq!(json["method"], "GET");
        assert_eq!(json["status"], 200);
        assert_eq!(json["size_bytes"], 12);
        assert_eq!(json["latency_us"], 150);
        assert_eq!(json["detail"], "set-cookie present");
    }

    #[test]
    fn hashed_keys_hide_the_url() {
        let event = CacheEvent::new(CacheEventType::Hit, "/secret");
        let json = event.to_json(&LoggingConfig::new().with_hash_keys(true));
        assert_eq!(json["key"], hash_key("/secret"));
    }

    #[test]
    fn event_type_names_match_serde() {
        for event_type in [
            CacheEventType::Hit,
            CacheEventType::WriteDropped,
            CacheEventType::PurgeDenied,
        ] {
            let serialized = serde_json::to_value(event_type).expect("serializes");
            assert_eq!(serialized, event_type.as_str());
        }
    }

    #[test]
    fn levels_follow_event_severity() {
        assert_eq!(CacheEvent::new(CacheEventType::WriteDropped, "/a").level(), Level::WARN);
        assert_eq!(CacheEvent::new(CacheEventType::Store, "/a").level(), Level::INFO);
        assert_eq!(CacheEvent::new(CacheEventType::PurgeDenied, "/a").level(), Level::INFO);
        assert_eq!(CacheEvent::new(CacheEventType::Hit, "/a").level(), Level::DEBUG);
        assert_eq!(CacheEvent::new(CacheEventType::Miss, "/a").level(), Level::DEBUG);
    }

    #[test]
    fn filtered_levels_are_not_serialized() {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(
                "tower_edge_cache::events=info",
            ))
            .with_writer(std::io::sink)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            assert!(!events_enabled(Level::DEBUG));
            assert!(events_enabled(Level::INFO));
            assert!(events_enabled(Level::WARN));
        });
    }

    #[test]
    fn disabled_logging_is_a_no_op() {
        let config = LoggingConfig::new().with_enabled(false);
        CacheEvent::new(CacheEventType::Miss, "/test").log(&config);
    }
}
