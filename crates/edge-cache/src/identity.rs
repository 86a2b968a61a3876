//! Request identity: canonical URL, canonical headers and the derived key.

use edge_core::{CacheConfig, CacheRequest};
use serde::{Deserialize, Serialize};

use crate::canonical_url::{CanonicalUrl, UrlCanonicalizer};
use crate::error::CacheResult;
use crate::key::{derive_key, CacheKey};
use crate::vary::{CanonicalHeaderSet, HeaderCanonicalizer};

/// Everything a request contributes to cache identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub url: CanonicalUrl,
    pub headers: CanonicalHeaderSet,
    pub key: CacheKey,
}

/// Runs both canonicalizers and the key deriver.
#[derive(Debug, Clone)]
pub struct RequestNormalizer {
    urls: UrlCanonicalizer,
    headers: HeaderCanonicalizer,
}

impl RequestNormalizer {
    /// Create from explicit canonicalizers.
    pub fn new(urls: UrlCanonicalizer, headers: HeaderCanonicalizer) -> Self {
        Self { urls, headers }
    }

    /// Create from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            UrlCanonicalizer::from_config(config),
            HeaderCanonicalizer::from_config(config),
        )
    }

    /// Derive the identity of `request`. Fails only on an unusable URL.
    pub fn normalize(&self, request: &CacheRequest) -> CacheResult<RequestIdentity> {
        let url = self.urls.canonicalize(&request.url)?;
        let headers = self
            .headers
            .canonicalize_for_path(&request.headers, url.path());
        let key = derive_key(&request.method, &url, &headers);
        Ok(RequestIdentity { url, headers, key })
    }
}
