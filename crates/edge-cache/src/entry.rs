//! Stored cache entries.

use std::time::Duration;

use edge_core::{unix_secs, HttpResponse};
use edge_data::{ConditionalHeaders, OriginResponse};
use http::header::{CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::directives::CacheControl;
use crate::error::CacheResult;
use crate::freshness::{self, FreshnessParams, FreshnessSource};
use crate::vary::is_hop_by_hop;

/// A response snapshot plus the metadata needed to judge its freshness.
///
/// Timestamps are Unix seconds. Headers are kept as ordered name/value pairs
/// so the entry serializes cleanly for network stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Response status code.
    pub status: u16,
    /// End-to-end response headers, lower-case names, in arrival order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    #[serde(default)]
    pub body: Vec<u8>,
    /// When the upstream request was sent.
    pub requested_at: u64,
    /// When the response was received (and stored).
    pub stored_at: u64,
    /// Age of the response when it was received.
    pub corrected_initial_age: u64,
    /// Freshness lifetime in seconds.
    pub freshness_lifetime: u64,
    /// Where the lifetime came from.
    pub freshness_source: FreshnessSource,
    /// Strong or weak entity tag, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// `Last-Modified` value, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// The response said `must-revalidate`, `proxy-revalidate` or `no-cache`.
    #[serde(default)]
    pub forbids_stale: bool,
}

impl CacheEntry {
    /// Snapshot an origin response.
    pub fn from_origin(response: &OriginResponse, params: &FreshnessParams) -> Self {
        let mut entry = Self {
            status: response.status.as_u16(),
            headers: end_to_end_pairs(&response.headers),
            body: response.body.clone(),
            requested_at: unix_secs(response.requested_at),
            stored_at: unix_secs(response.received_at),
            corrected_initial_age: 0,
            freshness_lifetime: 0,
            freshness_source: FreshnessSource::Default,
            etag: None,
            last_modified: None,
            forbids_stale: false,
        };
        entry.recompute(params);
        entry
    }

    /// Rebuild the stored headers as a header map.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    /// First stored value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Current age at `now`.
    pub fn current_age(&self, now: u64) -> u64 {
        freshness::current_age(self.corrected_initial_age, self.stored_at, now)
    }

    /// Whether the entry is fresh at `now`. An age equal to the lifetime is stale.
    pub fn is_fresh(&self, now: u64) -> bool {
        self.current_age(now) < self.freshness_lifetime
    }

    /// Seconds of freshness left at `now`.
    pub fn time_to_live(&self, now: u64) -> u64 {
        self.freshness_lifetime.saturating_sub(self.current_age(now))
    }

    /// Whether a conditional request can revalidate this entry.
    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Conditional headers for revalidating this entry.
    pub fn validators(&self) -> ConditionalHeaders {
        ConditionalHeaders {
            if_none_match: self.etag.clone(),
            if_modified_since: self.last_modified.clone(),
        }
    }

    /// Apply a `304 Not Modified` answer: its end-to-end headers replace the
    /// stored ones of the same name and freshness restarts from its receipt.
    pub fn refresh_from_not_modified(&mut self, response: &OriginResponse, params: &FreshnessParams) {
        let updates = end_to_end_pairs(&response.headers);
        let updated: Vec<&str> = updates
            .iter()
            .map(|(n, _)| n.as_str())
            .filter(|n| *n != CONTENT_LENGTH.as_str())
            .collect();

        self.headers.retain(|(n, _)| !updated.contains(&n.as_str()));
        self.headers.extend(
            updates
                .iter()
                .filter(|(n, _)| n.as_str() != CONTENT_LENGTH.as_str())
                .cloned(),
        );

        self.requested_at = unix_secs(response.requested_at);
        self.stored_at = unix_secs(response.received_at);
        self.recompute(params);
    }

    /// How long the store should keep this entry.
    ///
    /// Remaining freshness at storage time, extended by `revalidation_window`
    /// when validators allow a later conditional refresh.
    pub fn store_ttl(&self, revalidation_window: Duration) -> Duration {
        let fresh_for = self
            .freshness_lifetime
            .saturating_sub(self.corrected_initial_age);
        let ttl = Duration::from_secs(fresh_for);
        if self.has_validators() {
            ttl + revalidation_window
        } else {
            ttl
        }
    }

    /// Build the response returned to the client.
    pub fn to_response(&self) -> HttpResponse {
        HttpResponse {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers: self.header_map(),
            body: self.body.clone(),
        }
    }

    /// Serialize for network stores.
    pub fn to_json(&self) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize an entry written by [`CacheEntry::to_json`].
    pub fn from_json(bytes: &[u8]) -> CacheResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn recompute(&mut self, params: &FreshnessParams) {
        let headers = self.header_map();
        let cc = CacheControl::from_headers(&headers);
        let (lifetime, source) =
            freshness::freshness_lifetime(&headers, &cc, self.stored_at, params);
        self.freshness_lifetime = lifetime;
        self.freshness_source = source;
        self.corrected_initial_age =
            freshness::corrected_initial_age(&headers, self.requested_at, self.stored_at);
        self.forbids_stale = cc.forbids_stale();
        self.etag = self.header(ETAG.as_str()).map(str::to_string);
        self.last_modified = self.header(LAST_MODIFIED.as_str()).map(str::to_string);
    }
}

fn end_to_end_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
