//! Freshness evaluation for stored artifacts.
//!
//! Only the shared-cache lifetime (`s-maxage`) is honored, measured from the
//! stored `Date` header. Anything that cannot be evaluated fails open: the
//! artifact is treated as fresh.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::header::{CACHE_CONTROL, DATE};
use http::{HeaderMap, HeaderValue};

/// Type alias for the clock function
type ClockFn = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// Time source used for freshness checks and `Date` stamping.
#[derive(Clone)]
pub struct Clock {
    inner: ClockFn,
}

impl Clock {
    /// Wall-clock time.
    pub fn system() -> Self {
        Self::custom(SystemTime::now)
    }

    pub fn custom<F>(now: F) -> Self
    where
        F: Fn() -> SystemTime + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(now),
        }
    }

    pub fn now(&self) -> SystemTime {
        (self.inner)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Clock").field(&self.now()).finish()
    }
}

/// Returns `true` when an artifact with `headers` may still be served at `now`.
///
/// Fresh iff `Date + s-maxage` is strictly after `now`; an artifact is stale
/// at exactly `s-maxage` seconds. A missing `Cache-Control`, a missing or
/// malformed `s-maxage`, or a missing or malformed `Date` all count as fresh.
pub fn is_fresh(headers: &HeaderMap, now: SystemTime) -> bool {
    let Some(max_age) = shared_max_age(headers) else {
        return true;
    };

    let Some(date) = headers
        .get(DATE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| httpdate::parse_http_date(value.trim()).ok())
    else {
        tracing::debug!("stored artifact has no usable Date header");
        return true;
    };

    match date.checked_add(max_age) {
        Some(expires_at) => expires_at > now,
        None => true,
    }
}

/// Extracts `s-maxage=<seconds>` from the `Cache-Control` header(s).
pub fn shared_max_age(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|directive| {
            let (name, value) = directive.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("s-maxage") {
                return None;
            }
            let value = value.trim().trim_matches('"');
            value.parse::<u32>().ok().map(|secs| Duration::from_secs(secs.into()))
        })
}

/// Formats `time` as an IMF-fixdate `Date` header value.
pub fn http_date(time: SystemTime) -> Option<HeaderValue> {
    HeaderValue::from_str(&httpdate::fmt_http_date(time)).ok()
}
