//! Cache key derivation.

use std::sync::Arc;

use http::header::HOST;
use http::{HeaderMap, Request, Uri};

/// Type alias for the key extractor function
type KeyExtractorFn = Arc<dyn Fn(&Uri, &HeaderMap) -> String + Send + Sync>;

/// Derives the cache key for `req`.
///
/// See [`derive_key_from_parts`].
pub fn derive_key<B>(req: &Request<B>) -> String {
    derive_key_from_parts(req.uri(), req.headers())
}

/// Concatenates scheme, host, path and query into a cache key.
///
/// The scheme is included only when the request target carries one. The
/// host comes from the URI authority, falling back to the `Host` header for
/// origin-form targets. Fragments never reach the key. A target without a
/// path yields an empty key, which callers must treat as "not cacheable".
///
/// An absolute-form target (`PURGE http://host/path`, or any HTTP/2 request
/// once hyper fills in the scheme) therefore keys differently from an
/// origin-form `GET /path` with a `Host` header, and a purge sent that way
/// misses the stored entry. Install a [`KeyExtractor`] that drops the scheme
/// when clients mix both forms.
pub fn derive_key_from_parts(uri: &Uri, headers: &HeaderMap) -> String {
    let path = uri.path();
    if path.is_empty() {
        return String::new();
    }

    let host = uri
        .authority()
        .map(|authority| authority.as_str())
        .or_else(|| headers.get(HOST).and_then(|value| value.to_str().ok()))
        .unwrap_or_default();

    let mut key = String::with_capacity(host.len() + path.len() + 16);
    if let Some(scheme) = uri.scheme_str() {
        key.push_str(scheme);
        key.push_str("://");
    }
    key.push_str(host);
    key.push_str(path);
    if let Some(query) = uri.query() {
        key.push('?');
        key.push_str(query);
    }
    key
}

/// Strategy used to turn requests into cache keys.
///
/// Defaults to [`derive_key_from_parts`]. A custom extractor may return an
/// empty string to keep a request out of the cache.
#[derive(Clone)]
pub struct KeyExtractor {
    inner: KeyExtractorFn,
}

impl KeyExtractor {
    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&Uri, &HeaderMap) -> String + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(func),
        }
    }

    pub fn extract(&self, uri: &Uri, headers: &HeaderMap) -> String {
        (self.inner)(uri, headers)
    }
}

impl Default for KeyExtractor {
    fn default() -> Self {
        Self::custom(derive_key_from_parts)
    }
}
