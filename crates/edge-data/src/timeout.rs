//! Timeout bounds for origin fetches.

use std::time::Duration;

use async_trait::async_trait;
use edge_core::CacheRequest;

use crate::client::{ConditionalHeaders, FetchError, OriginFetcher, OriginResponse};

/// Timeout configuration for a fetch operation.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Total operation timeout.
    pub total: Duration,
}

impl TimeoutConfig {
    /// Create from a single total timeout.
    pub fn from_total(total: Duration) -> Self {
        Self { total }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            total: Duration::from_secs(10),
        }
    }
}

/// Wraps a fetcher and fails with [`FetchError::Timeout`] once the total
/// timeout elapses.
pub struct TimeoutFetcher<F> {
    inner: F,
    config: TimeoutConfig,
}

impl<F: OriginFetcher> TimeoutFetcher<F> {
    /// Wrap `inner` with `config`.
    pub fn new(inner: F, config: TimeoutConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<F: OriginFetcher> OriginFetcher for TimeoutFetcher<F> {
    async fn fetch(
        &self,
        request: &CacheRequest,
        conditional: Option<&ConditionalHeaders>,
    ) -> Result<OriginResponse, FetchError> {
        match tokio::time::timeout(self.config.total, self.inner.fetch(request, conditional)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(format!(
                "{} after {:?}",
                request.url, self.config.total
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    use http::StatusCode;

    struct Slow(Duration);

    #[async_trait]
    impl OriginFetcher for Slow {
        async fn fetch(
            &self,
            _request: &CacheRequest,
            _conditional: Option<&ConditionalHeaders>,
        ) -> Result<OriginResponse, FetchError> {
            tokio::time::sleep(self.0).await;
            Ok(OriginResponse::new(StatusCode::OK, "late", UNIX_EPOCH))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out() {
        let fetcher = TimeoutFetcher::new(
            Slow(Duration::from_secs(30)),
            TimeoutConfig::from_total(Duration::from_secs(1)),
        );
        let req = CacheRequest::get("https://example.com/slow");
        let err = fetcher.fetch(&req, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_fetch_passes_through() {
        let fetcher = TimeoutFetcher::new(
            Slow(Duration::from_millis(10)),
            TimeoutConfig::from_total(Duration::from_secs(1)),
        );
        let req = CacheRequest::get("https://example.com/fast");
        let resp = fetcher.fetch(&req, None).await.unwrap();
        assert_eq!(resp.body, b"late");
    }
}
