use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{AUTHORIZATION, COOKIE};
use http::{HeaderMap, Method, Request};

use crate::freshness::Clock;
use crate::key::derive_key;
use crate::logging::LoggingConfig;
use crate::purge::PurgeAcl;

/// Method used by purge requests.
pub const PURGE_METHOD: &str = "PURGE";

/// Cookie names (case-insensitive substrings) that mark a personalized request.
const SESSION_COOKIE_MARKERS: [&str; 2] = ["session=", "token="];

/// Returns `true` when `req` may be answered from, and stored in, the cache.
///
/// Requests carrying Basic credentials or a session/token cookie are never
/// cached, and neither are requests whose derived key is empty. Method
/// routing is handled separately by [`CachePolicy::should_cache_method`].
pub fn is_cacheable<B>(req: &Request<B>) -> bool {
    !request_bypasses_cache(req.headers()) && !derive_key(req).is_empty()
}

/// Header-only part of [`is_cacheable`].
pub fn request_bypasses_cache(headers: &HeaderMap) -> bool {
    has_basic_credentials(headers) || has_session_cookie(headers)
}

/// Detects `Authorization: Basic <base64(user:password)>`.
pub fn has_basic_credentials(headers: &HeaderMap) -> bool {
    headers
        .get_all(AUTHORIZATION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| {
            let Some((scheme, payload)) = value.trim().split_once(' ') else {
                return false;
            };
            scheme.eq_ignore_ascii_case("basic")
                && STANDARD
                    .decode(payload.trim())
                    .is_ok_and(|decoded| decoded.contains(&b':'))
        })
}

pub fn has_session_cookie(headers: &HeaderMap) -> bool {
    headers
        .get_all(COOKIE)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()).to_ascii_lowercase())
        .any(|cookie| {
            SESSION_COOKIE_MARKERS
                .iter()
                .any(|marker| cookie.contains(marker))
        })
}

/// Runtime cache policy shared by the layer and every service clone.
///
/// Policies are cheap to clone and immutable once built; the `with_*`
/// helpers return new copies with the requested change.
#[derive(Clone)]
pub struct CachePolicy {
    purge_acl: Arc<PurgeAcl>,
    clock: Clock,
    coalesce_misses: bool,
    logging: LoggingConfig,
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("purge_acl", &self.purge_acl)
            .field("coalesce_misses", &self.coalesce_misses)
            .field("logging", &self.logging)
            .finish()
    }
}

impl CachePolicy {
    /// Only safe methods take the cache path.
    pub fn should_cache_method(&self, method: &Method) -> bool {
        matches!(method, &Method::GET | &Method::HEAD)
    }

    pub fn is_purge(&self, method: &Method) -> bool {
        method.as_str() == PURGE_METHOD
    }

    pub fn purge_acl(&self) -> &PurgeAcl {
        &self.purge_acl
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn coalesce_misses(&self) -> bool {
        self.coalesce_misses
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    pub fn with_purge_acl(mut self, acl: PurgeAcl) -> Self {
        self.purge_acl = Arc::new(acl);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_coalesce_misses(mut self, enabled: bool) -> Self {
        self.coalesce_misses = enabled;
        self
    }

    pub fn with_logging(mut self, config: LoggingConfig) -> Self {
        self.logging = config;
        self
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            purge_acl: Arc::new(PurgeAcl::localhost()),
            clock: Clock::system(),
            coalesce_misses: false,
            logging: LoggingConfig::default(),
        }
    }
}
