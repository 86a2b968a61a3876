//! Cache key derivation.

use http::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical_url::CanonicalUrl;
use crate::vary::CanonicalHeaderSet;

/// Version tag baked into every key; bump when the framing changes.
const KEY_VERSION: &str = "v1";

/// Digest bytes kept from the SHA-256 output.
const KEY_DIGEST_BYTES: usize = 16;

/// A cache key uniquely identifying a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// The computed key string.
    key: String,
    /// Components that make up the key (for debugging).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    components: Vec<String>,
}

impl CacheKey {
    /// Create a cache key from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            components: Vec::new(),
        }
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Get the key components (for debugging).
    pub fn components(&self) -> &[String] {
        &self.components
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Derive the key shared by every request with the same method, canonical
/// URL and canonical header set.
///
/// Each component is length-prefixed before hashing, so no value can forge a
/// separator. The digest is SHA-256 truncated to 128 bits with no per-process
/// seed, making keys stable across restarts and across instances sharing a
/// store.
pub fn derive_key(method: &Method, url: &CanonicalUrl, headers: &CanonicalHeaderSet) -> CacheKey {
    let mut frame = Vec::with_capacity(128);
    let mut components = Vec::new();

    push_field(&mut frame, KEY_VERSION.as_bytes());
    push_field(&mut frame, method.as_str().as_bytes());
    components.push(format!("method:{}", method));

    push_field(&mut frame, url.as_str().as_bytes());
    components.push(format!("url:{}", url));

    for (name, value) in headers.headers() {
        push_field(&mut frame, b"h");
        push_field(&mut frame, name.as_bytes());
        push_field(&mut frame, value.as_bytes());
        components.push(format!("header:{}={}", name, value));
    }

    if let Some(cookies) = headers.cookies() {
        push_field(&mut frame, b"c");
        push_field(&mut frame, cookies.as_bytes());
        components.push(format!("cookies:{}", cookies));
    }

    let digest = Sha256::digest(&frame);
    CacheKey {
        key: format!("{}:{}", KEY_VERSION, hex::encode(&digest[..KEY_DIGEST_BYTES])),
        components,
    }
}

fn push_field(frame: &mut Vec<u8>, bytes: &[u8]) {
    frame.extend_from_slice(bytes.len().to_string().as_bytes());
    frame.push(b':');
    frame.extend_from_slice(bytes);
}
