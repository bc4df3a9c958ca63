//! Encoding of captured responses into storable artifacts.
//!
//! An encoded artifact is laid out as:
//!
//! ```text
//! [format version: u8][bincode metadata record][raw body bytes ...]
//! ```
//!
//! The metadata record (status and headers) is self-delimiting, so the
//! decoder reads it from a cursor and takes everything after it as the body
//! without knowing the total length up front.

use std::io::Cursor;

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

const FORMAT_VERSION: u8 = 1;

/// A captured upstream response: status, headers and full body.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedArtifact {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Serialize, Deserialize)]
struct StoredMetadata {
    status: u16,
    headers: Vec<(String, Vec<Vec<u8>>)>,
}

impl CachedArtifact {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Serializes the metadata record followed by the body.
    pub fn encode(&self) -> Result<Bytes, CacheError> {
        let metadata = StoredMetadata {
            status: self.status.as_u16(),
            headers: group_headers(&self.headers),
        };

        let mut buf = BytesMut::with_capacity(self.body.len() + 256).writer();
        buf.get_mut().put_u8(FORMAT_VERSION);
        bincode::serialize_into(&mut buf, &metadata)
            .map_err(|err| CacheError::Codec(err.to_string()))?;

        let mut buf = buf.into_inner();
        buf.extend_from_slice(&self.body);
        Ok(buf.freeze())
    }

    /// Reverses [`CachedArtifact::encode`].
    ///
    /// The returned body shares the input buffer.
    pub fn decode(bytes: Bytes) -> Result<Self, CacheError> {
        let Some((&version, _)) = bytes.split_first() else {
            return Err(CacheError::Codec("empty artifact".into()));
        };
        if version != FORMAT_VERSION {
            return Err(CacheError::Codec(format!(
                "unsupported artifact format version {version}"
            )));
        }

        let mut cursor = Cursor::new(&bytes[1..]);
        let metadata: StoredMetadata = bincode::deserialize_from(&mut cursor)
            .map_err(|err| CacheError::Codec(err.to_string()))?;
        let body_start = 1 + cursor.position() as usize;

        let status = StatusCode::from_u16(metadata.status)
            .map_err(|err| CacheError::Codec(err.to_string()))?;

        let mut headers = HeaderMap::with_capacity(metadata.headers.len());
        for (name, values) in metadata.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| CacheError::Codec(err.to_string()))?;
            for value in values {
                let value = HeaderValue::from_bytes(&value)
                    .map_err(|err| CacheError::Codec(err.to_string()))?;
                headers.append(name.clone(), value);
            }
        }

        Ok(Self {
            status,
            headers,
            body: bytes.slice(body_start..),
        })
    }

    /// Converts the artifact back into an `http::Response`.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    /// Same as [`into_response`](Self::into_response) but without a body,
    /// for answering `HEAD` requests.
    pub fn into_head_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::default());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Groups header values by name, names in first-appearance order.
fn group_headers(headers: &HeaderMap) -> Vec<(String, Vec<Vec<u8>>)> {
    headers
        .keys()
        .map(|name| {
            let values = headers
                .get_all(name)
                .iter()
                .map(|value| value.as_bytes().to_vec())
                .collect();
            (name.as_str().to_owned(), values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CACHE_CONTROL, CONTENT_TYPE, VARY};

    fn sample() -> CachedArtifact {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("s-maxage=30"));
        headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));
        headers.append(VARY, HeaderValue::from_static("Cookie"));
        CachedArtifact::new(StatusCode::OK, headers, Bytes::from_static(b"<p>hello</p>"))
    }

    #[test]
    fn decode_restores_status_headers_and_body() {
        let artifact = sample();
        let decoded = CachedArtifact::decode(artifact.encode().expect("encode")).expect("decode");

        assert_eq!(decoded, artifact);
        let vary: Vec<_> = decoded.headers.get_all(VARY).iter().collect();
        assert_eq!(vary, ["Accept-Encoding", "Cookie"]);
    }

    #[test]
    fn body_is_the_raw_tail() {
        let encoded = sample().encode().expect("encode");
        assert_eq!(encoded[0], FORMAT_VERSION);
        assert!(encoded.ends_with(b"<p>hello</p>"));
    }

    #[test]
    fn binary_body_and_empty_headers_survive() {
        let body: Vec<u8> = (0..=255).collect();
        let artifact = CachedArtifact::new(
            StatusCode::NO_CONTENT,
            HeaderMap::new(),
            Bytes::from(body.clone()),
        );
        let decoded = CachedArtifact::decode(artifact.encode().expect("encode")).expect("decode");
        assert_eq!(decoded.status, StatusCode::NO_CONTENT);
        assert!(decoded.headers.is_empty());
        assert_eq!(decoded.body.as_ref(), body.as_slice());
    }

    #[test]
    fn rejects_garbage() {
        assert!(CachedArtifact::decode(Bytes::new()).is_err());
        assert!(CachedArtifact::decode(Bytes::from_static(b"\x09abc")).is_err());
        assert!(CachedArtifact::decode(Bytes::from_static(b"\x01")).is_err());
    }

    #[test]
    fn head_response_drops_body_only() {
        let response = sample().into_head_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html");
    }
}
