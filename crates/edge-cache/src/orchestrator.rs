//! Per-request cache orchestration.

use std::sync::Arc;

use edge_core::{CacheConfig, CacheRequest, Clock, HttpResponse, SystemClock};
use edge_data::OriginFetcher;
use edge_observability::CacheMetrics;
use http::header::AUTHORIZATION;
use http::StatusCode;

use crate::directives::CacheControl;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::flight::{Joined, SingleFlight};
use crate::headers::{should_include_debug_headers, CacheExplainHeaders, CacheStatus};
use crate::identity::{RequestIdentity, RequestNormalizer};
use crate::key::CacheKey;
use crate::policy::{BypassReason, CachePolicy, PolicyDecision};
use crate::store::CacheStore;

/// A response together with how it was produced.
#[derive(Debug, Clone)]
struct Served {
    response: HttpResponse,
    explain: CacheExplainHeaders,
}

/// Result of one origin round trip.
struct Fetched {
    served: Served,
    /// The response passed the same checks that allow storing it, so any
    /// caller with this key may receive it.
    shareable: bool,
}

/// What a flight leader hands the followers waiting on its key.
#[derive(Debug, Clone)]
enum Published {
    Response(Served),
    /// The leader's response was for it alone; followers fetch their own.
    NotShareable,
    Failed(CacheError),
}

/// HTTP response cache in front of an origin.
///
/// Each call to [`EdgeCache::handle`] canonicalizes the request, derives its
/// key, consults the store, evaluates policy and contacts the origin at most
/// once. Concurrent misses for the same key share a single origin fetch.
pub struct EdgeCache<S, F> {
    normalizer: RequestNormalizer,
    policy: CachePolicy,
    store: S,
    fetcher: F,
    clock: Arc<dyn Clock>,
    metrics: Arc<CacheMetrics>,
    flights: SingleFlight<Published>,
    explain_headers: bool,
}

impl<S: CacheStore, F: OriginFetcher> EdgeCache<S, F> {
    /// Create a cache from configuration and its two collaborators.
    pub fn new(config: &CacheConfig, store: S, fetcher: F) -> Self {
        Self {
            normalizer: RequestNormalizer::from_config(config),
            policy: CachePolicy::from_config(config),
            store,
            fetcher,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(CacheMetrics::new()),
            flights: SingleFlight::new(),
            explain_headers: config.explain_headers,
        }
    }

    /// Use a specific clock for ages and freshness.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record into shared metrics.
    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Counters for this cache.
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The request normalizer.
    pub fn normalizer(&self) -> &RequestNormalizer {
        &self.normalizer
    }

    /// The policy evaluator.
    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Handle one request.
    ///
    /// Only [`crate::CacheError::OriginUnavailable`] is returned; store
    /// failures and unusable URLs degrade to contacting the origin.
    #[tracing::instrument(
        name = "cache.handle",
        skip_all,
        fields(request_id = %request.request_id, method = %request.method)
    )]
    pub async fn handle(&self, request: CacheRequest) -> CacheResult<HttpResponse> {
        let debug = self.explain_headers || should_include_debug_headers(&request.headers);
        let request_cc = CacheControl::from_request_headers(&request.headers);

        let identity = match self.normalizer.normalize(&request) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "Bypassing cache");
                return self
                    .bypass(&request, &request_cc, BypassReason::InvalidUrl, debug)
                    .await;
            }
        };

        if let Some(reason) = self.policy.check_request(&request.method, &request_cc) {
            return self.bypass(&request, &request_cc, reason, debug).await;
        }

        let cached = self.lookup(&identity.key).await;
        let now = self.clock.now_secs();
        let decision = self.policy.evaluate(&request_cc, cached, now);
        tracing::debug!(key = %identity.key, decision = decision.kind(), "Evaluated cache policy");

        let served = match decision {
            PolicyDecision::FreshHit { entry, age, stale } => {
                if stale {
                    self.metrics.record_stale_hit();
                } else {
                    self.metrics.record_hit();
                }
                let status = if stale { CacheStatus::Stale } else { CacheStatus::Hit };
                Served {
                    response: entry.to_response(),
                    explain: CacheExplainHeaders::new(status)
                        .with_age(age)
                        .with_key(&identity.key)
                        .with_ttl(entry.time_to_live(now)),
                }
            }
            PolicyDecision::MustRevalidate { entry, .. } => {
                self.metrics.record_revalidation();
                self.fill(&request, &identity, Some(entry)).await?
            }
            PolicyDecision::Miss { reason } => {
                tracing::debug!(key = %identity.key, ?reason, "Cache miss");
                self.metrics.record_miss();
                self.fill(&request, &identity, None).await?
            }
            PolicyDecision::Bypass { reason } => {
                return self.bypass(&request, &request_cc, reason, debug).await;
            }
            PolicyDecision::Unsatisfiable => {
                self.metrics.record_unsatisfiable();
                Served {
                    response: HttpResponse::new(StatusCode::GATEWAY_TIMEOUT, Vec::new()),
                    explain: CacheExplainHeaders::new(CacheStatus::Unsatisfiable)
                        .with_key(&identity.key),
                }
            }
        };

        Ok(finish(served, debug))
    }

    /// Fetch through the key's flight. Followers only receive responses that
    /// could have been stored; anything else is fetched again per caller.
    /// Requests carrying credentials always fetch on their own.
    async fn fill(
        &self,
        request: &CacheRequest,
        identity: &RequestIdentity,
        stale: Option<CacheEntry>,
    ) -> CacheResult<Served> {
        if request.headers.contains_key(AUTHORIZATION) {
            return self.fetch_alone(request, identity, stale).await;
        }

        let retry_with = stale.clone();
        let work = move || async move {
            let result = self.fetch_and_store(request, identity, stale).await;
            let published = match &result {
                Ok(fetched) if fetched.shareable => Published::Response(fetched.served.clone()),
                Ok(_) => Published::NotShareable,
                Err(e) => Published::Failed(e.clone()),
            };
            (result.map(|fetched| fetched.served), published)
        };

        match self.flights.run(identity.key.as_str(), work).await {
            Joined::Led(result) => result,
            Joined::Followed(Published::Response(served)) => {
                self.metrics.record_coalesced();
                tracing::debug!(key = %identity.key, "Shared in-flight origin fetch");
                Ok(served)
            }
            Joined::Followed(Published::Failed(e)) => {
                self.metrics.record_coalesced();
                tracing::debug!(key = %identity.key, "Shared in-flight origin failure");
                Err(e)
            }
            Joined::Followed(Published::NotShareable) => {
                tracing::debug!(key = %identity.key, "In-flight response not shareable, fetching again");
                self.fetch_alone(request, identity, retry_with).await
            }
        }
    }

    async fn fetch_alone(
        &self,
        request: &CacheRequest,
        identity: &RequestIdentity,
        stale: Option<CacheEntry>,
    ) -> CacheResult<Served> {
        self.fetch_and_store(request, identity, stale)
            .await
            .map(|fetched| fetched.served)
    }

    async fn fetch_and_store(
        &self,
        request: &CacheRequest,
        identity: &RequestIdentity,
        stale: Option<CacheEntry>,
    ) -> CacheResult<Fetched> {
        let validators = stale.as_ref().map(CacheEntry::validators);

        self.metrics.record_origin_fetch();
        let origin = match self.fetcher.fetch(request, validators.as_ref()).await {
            Ok(origin) => origin,
            Err(e) => {
                self.metrics.record_origin_failure();
                tracing::warn!(key = %identity.key, error = %e, "Origin fetch failed");
                return Err(e.into());
            }
        };
        let now = self.clock.now_secs();

        if origin.is_not_modified() {
            if let Some(mut entry) = stale {
                self.metrics.record_not_modified();
                self.policy.refresh(&mut entry, &origin);
                let shareable = match self.policy.refreshed_storability(&entry) {
                    Ok(()) => {
                        self.write(&identity.key, &entry).await;
                        true
                    }
                    Err(reason) => {
                        tracing::debug!(key = %identity.key, %reason, "Revalidated entry no longer storable");
                        self.remove(&identity.key).await;
                        false
                    }
                };
                return Ok(Fetched {
                    served: Served {
                        response: entry.to_response(),
                        explain: CacheExplainHeaders::new(CacheStatus::Revalidated)
                            .with_age(entry.current_age(now))
                            .with_key(&identity.key)
                            .with_ttl(entry.time_to_live(now)),
                    },
                    shareable,
                });
            }
        }

        let mut explain = CacheExplainHeaders::new(CacheStatus::Miss).with_key(&identity.key);
        let shareable = match self
            .policy
            .storability(&request.method, &request.headers, &origin)
        {
            Ok(()) => {
                let entry = self.policy.entry_from(&origin);
                explain = explain.with_ttl(entry.time_to_live(now));
                self.write(&identity.key, &entry).await;
                true
            }
            Err(reason) => {
                self.metrics.record_store_skipped();
                tracing::debug!(key = %identity.key, %reason, "Response not stored");
                false
            }
        };

        Ok(Fetched {
            served: Served {
                response: origin.into_response(),
                explain,
            },
            shareable,
        })
    }

    async fn bypass(
        &self,
        request: &CacheRequest,
        request_cc: &CacheControl,
        reason: BypassReason,
        debug: bool,
    ) -> CacheResult<HttpResponse> {
        if request_cc.only_if_cached {
            self.metrics.record_unsatisfiable();
            let served = Served {
                response: HttpResponse::new(StatusCode::GATEWAY_TIMEOUT, Vec::new()),
                explain: CacheExplainHeaders::new(CacheStatus::Unsatisfiable),
            };
            return Ok(finish(served, debug));
        }

        tracing::debug!(?reason, "Cache bypassed");
        self.metrics.record_bypass();
        self.metrics.record_origin_fetch();

        let origin = self.fetcher.fetch(request, None).await.map_err(|e| {
            self.metrics.record_origin_failure();
            tracing::warn!(error = %e, "Origin fetch failed");
            e
        })?;

        let served = Served {
            response: origin.into_response(),
            explain: CacheExplainHeaders::new(CacheStatus::Bypass),
        };
        Ok(finish(served, debug))
    }

    /// Read an entry; a failing store reads as empty.
    async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.store.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                self.metrics.record_store_read_error();
                tracing::warn!(%key, error = %e, "Cache store read failed, treating as miss");
                None
            }
        }
    }

    /// Write an entry; failures are logged and dropped.
    async fn write(&self, key: &CacheKey, entry: &CacheEntry) {
        let ttl = self.policy.store_ttl(entry);
        if ttl.is_zero() {
            self.metrics.record_store_skipped();
            tracing::debug!(%key, "Response already stale, not stored");
            return;
        }

        match self.store.set(key, entry.clone(), ttl).await {
            Ok(()) => {
                self.metrics.record_store();
                tracing::debug!(%key, ttl_secs = ttl.as_secs(), "Stored response");
            }
            Err(e) => {
                self.metrics.record_store_write_error();
                tracing::warn!(%key, error = %e, "Cache store write failed");
            }
        }
    }

    async fn remove(&self, key: &CacheKey) {
        if let Err(e) = self.store.delete(key).await {
            self.metrics.record_store_write_error();
            tracing::warn!(%key, error = %e, "Cache store delete failed");
        }
    }
}

fn finish(served: Served, debug: bool) -> HttpResponse {
    let Served {
        mut response,
        explain,
    } = served;
    explain.apply(&mut response, debug);
    response
}
