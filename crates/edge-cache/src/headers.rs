//! Cache status and debugging headers.

use edge_core::HttpResponse;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// Header names for cache debugging. Lower-case, as sent on the wire by HTTP/2.
pub mod header_names {
    /// Cache status (HIT, MISS, REVALIDATED, STALE, BYPASS, UNSATISFIABLE).
    pub const X_CACHE_STATUS: &str = "x-cache-status";
    /// Cache key used for lookup.
    pub const X_CACHE_KEY: &str = "x-cache-key";
    /// Freshness remaining in seconds.
    pub const X_CACHE_TTL: &str = "x-cache-ttl";
    /// Request header asking for debug headers.
    pub const X_DEBUG_CACHE: &str = "x-debug-cache";
    /// Standard `Age` header.
    pub const AGE: &str = "age";
}

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    /// Served from a fresh stored entry.
    Hit,
    /// Fetched from the origin.
    Miss,
    /// Stored entry confirmed by a 304.
    Revalidated,
    /// Served stale under the client's `max-stale`.
    Stale,
    /// Caching skipped for this exchange.
    Bypass,
    /// `only-if-cached` could not be honored.
    Unsatisfiable,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Miss => write!(f, "MISS"),
            Self::Revalidated => write!(f, "REVALIDATED"),
            Self::Stale => write!(f, "STALE"),
            Self::Bypass => write!(f, "BYPASS"),
            Self::Unsatisfiable => write!(f, "UNSATISFIABLE"),
        }
    }
}

/// Cache explain headers attached to every orchestrated response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheExplainHeaders {
    /// Overall cache status.
    pub status: CacheStatus,
    /// Age of a stored response in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
    /// Cache key used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    /// Remaining freshness in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl CacheExplainHeaders {
    /// Create explain headers with only a status.
    pub fn new(status: CacheStatus) -> Self {
        Self {
            status,
            age_secs: None,
            cache_key: None,
            ttl_secs: None,
        }
    }

    /// Set age.
    pub fn with_age(mut self, age: u64) -> Self {
        self.age_secs = Some(age);
        self
    }

    /// Set cache key.
    pub fn with_key(mut self, key: &CacheKey) -> Self {
        self.cache_key = Some(key.as_str().to_string());
        self
    }

    /// Set remaining TTL.
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl_secs = Some(ttl);
        self
    }

    /// Write the headers into `response`. Key and TTL are only written when
    /// `include_debug` is set.
    pub fn apply(&self, response: &mut HttpResponse, include_debug: bool) {
        response.set_header(header_names::X_CACHE_STATUS, &self.status.to_string());

        if let Some(age) = self.age_secs {
            response.set_header(header_names::AGE, &age.to_string());
        }

        if include_debug {
            if let Some(key) = &self.cache_key {
                response.set_header(header_names::X_CACHE_KEY, key);
            }
            if let Some(ttl) = self.ttl_secs {
                response.set_header(header_names::X_CACHE_TTL, &ttl.to_string());
            }
        }
    }

    /// Convert to JSON for debugging output.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Whether the request asked for debug headers (`X-Debug-Cache: 1`).
pub fn should_include_debug_headers(request_headers: &HeaderMap) -> bool {
    request_headers
        .get_all(header_names::X_DEBUG_CACHE)
        .iter()
        .any(|value| value.as_bytes() == b"1")
}
