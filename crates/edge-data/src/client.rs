//! Origin fetcher trait and response types.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use edge_core::{CacheRequest, HttpResponse};
use http::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, StatusCode};

/// Error type for fetch operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request error: {0}")]
    Request(String),
}

/// A response received from the origin.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Vec<u8>,
    /// When the request was sent upstream.
    pub requested_at: SystemTime,
    /// When the response was received.
    pub received_at: SystemTime,
}

impl OriginResponse {
    /// Create a response sent and received at the same instant.
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>, at: SystemTime) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            requested_at: at,
            received_at: at,
        }
    }

    /// Append a header. Invalid values are ignored.
    pub fn with_header(mut self, name: http::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
        self
    }

    /// Whether this is a `304 Not Modified` answer to a conditional request.
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    /// Convert into the response returned to the client.
    pub fn into_response(self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// Validators sent upstream when revalidating a stale entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    /// Value for `If-None-Match` (from the stored `ETag`).
    pub if_none_match: Option<String>,
    /// Value for `If-Modified-Since` (from the stored `Last-Modified`).
    pub if_modified_since: Option<String>,
}

impl ConditionalHeaders {
    /// Write the validators into an outbound header map.
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Some(etag) = self.if_none_match.as_deref() {
            if let Ok(v) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, v);
            }
        }
        if let Some(date) = self.if_modified_since.as_deref() {
            if let Ok(v) = HeaderValue::from_str(date) {
                headers.insert(IF_MODIFIED_SINCE, v);
            }
        }
    }
}

/// Performs the upstream request when the cache decides one is needed.
///
/// Timeouts, retries and connection management are the implementor's concern;
/// the cache calls `fetch` at most once per inbound request.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Fetch a response for `request`, adding `conditional` validators if given.
    async fn fetch(
        &self,
        request: &CacheRequest,
        conditional: Option<&ConditionalHeaders>,
    ) -> Result<OriginResponse, FetchError>;
}

#[async_trait]
impl<F: OriginFetcher + ?Sized> OriginFetcher for Arc<F> {
    async fn fetch(
        &self,
        request: &CacheRequest,
        conditional: Option<&ConditionalHeaders>,
    ) -> Result<OriginResponse, FetchError> {
        (**self).fetch(request, conditional).await
    }
}
