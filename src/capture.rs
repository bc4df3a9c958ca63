//! Response-side cacheability.
//!
//! Capture happens in two phases: the layer first buffers the complete
//! upstream response, then runs [`check_response`] once against its status
//! and headers. Responses that fail are still returned to the client
//! unchanged; they are just never stored.

use std::fmt;
use std::time::SystemTime;

use http::header::{CACHE_CONTROL, DATE, SET_COOKIE};
use http::{HeaderMap, StatusCode};

use crate::freshness::http_date;

const DISQUALIFYING_DIRECTIVES: [&str; 3] = ["private", "no-cache", "no-store"];

/// Why a response was kept out of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncacheableReason {
    /// The status is outside the 2xx range.
    Status(StatusCode),
    MissingCacheControl,
    /// `Cache-Control` contains `private`, `no-cache` or `no-store`.
    CacheControlDisallows,
    SetCookie,
}

impl fmt::Display for UncacheableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UncacheableReason::Status(status) => write!(f, "status {}", status.as_u16()),
            UncacheableReason::MissingCacheControl => f.write_str("missing cache-control"),
            UncacheableReason::CacheControlDisallows => f.write_str("cache-control disallows"),
            UncacheableReason::SetCookie => f.write_str("set-cookie present"),
        }
    }
}

/// Decides whether a buffered response may be stored.
///
/// Checks run in order: 2xx status, presence of `Cache-Control`, absence of
/// disqualifying directives, absence of `Set-Cookie`.
pub fn check_response(status: StatusCode, headers: &HeaderMap) -> Result<(), UncacheableReason> {
    if !status.is_success() {
        return Err(UncacheableReason::Status(status));
    }
    if !headers.contains_key(CACHE_CONTROL) {
        return Err(UncacheableReason::MissingCacheControl);
    }
    if cache_control_disallows(headers) {
        return Err(UncacheableReason::CacheControlDisallows);
    }
    if headers.contains_key(SET_COOKIE) {
        return Err(UncacheableReason::SetCookie);
    }
    Ok(())
}

fn cache_control_disallows(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()).to_ascii_lowercase())
        .any(|value| {
            DISQUALIFYING_DIRECTIVES
                .iter()
                .any(|directive| value.contains(directive))
        })
}

/// Adds a `Date` header set to `now` unless one is already present.
///
/// Returns `true` when a header was added.
pub fn stamp_date(headers: &mut HeaderMap, now: SystemTime) -> bool {
    if headers.contains_key(DATE) {
        return false;
    }
    match http_date(now) {
        Some(value) => {
            headers.insert(DATE, value);
            true
        }
        None => false,
    }
}
