//! Cache error taxonomy.

use edge_data::FetchError;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised inside the cache pipeline.
///
/// Only [`CacheError::OriginUnavailable`] ever reaches the caller of the
/// orchestrator; every other variant degrades to contacting the origin.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The request URL could not be parsed as an absolute URL.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The cache store failed to read or write.
    #[error("cache store unavailable: {0}")]
    StoreUnavailable(String),

    /// The origin fetch failed.
    #[error("origin unavailable: {0}")]
    OriginUnavailable(String),

    /// Caching directives contradict each other or cannot be parsed.
    #[error("ambiguous caching directives: {0}")]
    PolicyAmbiguous(String),
}

impl From<FetchError> for CacheError {
    fn from(e: FetchError) -> Self {
        Self::OriginUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::StoreUnavailable(format!("serialization error: {}", e))
    }
}
