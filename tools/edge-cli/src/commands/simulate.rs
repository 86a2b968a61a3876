//! Request replay against an in-memory cache.
//!
//! Every request goes through the full cache path. Time is simulated, so a
//! run of hours finishes instantly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use edge_cache::{header_names, EdgeCache, InMemoryStore};
use edge_core::{CacheConfig, CacheRequest, Clock, ManualClock, RequestId, SystemClock};
use edge_data::{
    ConditionalHeaders, FetchError, OriginFetcher, OriginResponse, RetryPolicy, RetryingFetcher,
    TimeoutConfig, TimeoutFetcher,
};
use edge_observability::MetricsSnapshot;
use http::header::{ETAG, IF_NONE_MATCH};
use http::{HeaderMap, HeaderName, StatusCode};
use serde::Serialize;

use super::{build_request, SimulateArgs};
use crate::context::Context;
use crate::output::status_badge;

/// One replayed request.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    /// Seconds since the first request.
    pub at: u64,
    pub status: u16,
    pub cache_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    /// Origin fetches so far.
    pub origin_fetches: usize,
}

/// Result of a replay.
#[derive(Debug, Serialize)]
pub struct Simulation {
    pub steps: Vec<Step>,
    pub metrics: MetricsSnapshot,
}

/// Origin that answers every request with the same headers.
struct SyntheticOrigin {
    clock: ManualClock,
    headers: Vec<(HeaderName, String)>,
    not_modified: bool,
    fetches: AtomicUsize,
}

impl SyntheticOrigin {
    fn etag(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| *name == ETAG)
            .map(|(_, value)| value.as_str())
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OriginFetcher for SyntheticOrigin {
    async fn fetch(
        &self,
        _request: &CacheRequest,
        conditional: Option<&ConditionalHeaders>,
    ) -> Result<OriginResponse, FetchError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;

        // What a real origin would see on the wire.
        let mut sent = HeaderMap::new();
        if let Some(conditional) = conditional {
            conditional.apply(&mut sent);
        }
        let matches = match (
            sent.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()),
            self.etag(),
        ) {
            (Some(sent), Some(current)) => sent == current,
            _ => false,
        };
        let (status, body) = if self.not_modified && matches {
            (StatusCode::NOT_MODIFIED, Vec::new())
        } else {
            (StatusCode::OK, format!("origin response #{}", n).into_bytes())
        };

        Ok(self
            .headers
            .iter()
            .fold(OriginResponse::new(status, body, self.clock.now()), |resp, (name, value)| {
                resp.with_header(name.clone(), value)
            }))
    }
}

/// Run the simulate command.
pub async fn run(args: SimulateArgs, ctx: &Context) -> Result<()> {
    let sim = simulate(&ctx.config, &args, ManualClock::at(SystemClock.now_secs())).await?;

    if ctx.output.is_json() {
        ctx.output.json(&sim);
        return Ok(());
    }

    ctx.output.header(&format!("{} requests to {}", args.requests, args.url));
    let widths = [8, 6, 14, 6, 7];
    ctx.output.table_row(&["t", "status", "cache", "age", "fetches"], &widths);
    for step in &sim.steps {
        let at = format!("+{}s", step.at);
        let status = step.status.to_string();
        let badge = status_badge(&step.cache_status);
        let fetches = step.origin_fetches.to_string();
        ctx.output.table_row(
            &[
                at.as_str(),
                status.as_str(),
                badge.as_str(),
                step.age.as_deref().unwrap_or("-"),
                fetches.as_str(),
            ],
            &widths,
        );
    }

    ctx.output.header("Metrics");
    for line in sim.metrics.to_summary().lines() {
        ctx.output.kv("", line.trim());
    }
    Ok(())
}

/// Replay `args.requests` identical requests `args.interval` seconds apart.
pub async fn simulate(config: &CacheConfig, args: &SimulateArgs, clock: ManualClock) -> Result<Simulation> {
    let request = build_request(&args.url, "GET", &args.request_headers)?;

    let mut headers = Vec::with_capacity(args.response_headers.len());
    for (name, value) in &args.response_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name: {}", name))?;
        headers.push((name, value.clone()));
    }

    let origin = Arc::new(SyntheticOrigin {
        clock: clock.clone(),
        headers,
        not_modified: args.not_modified,
        fetches: AtomicUsize::new(0),
    });
    let fetcher = TimeoutFetcher::new(
        RetryingFetcher::new(origin.clone(), RetryPolicy::none()),
        TimeoutConfig::default(),
    );
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let store = InMemoryStore::with_clock(shared.clone());
    let cache = EdgeCache::new(config, store, fetcher).with_clock(shared);

    let mut steps = Vec::with_capacity(args.requests);
    for i in 0..args.requests {
        if i > 0 {
            clock.advance(Duration::from_secs(args.interval));
        }
        let response = cache
            .handle(request.clone().with_request_id(RequestId::generate()))
            .await?;
        steps.push(Step {
            at: i as u64 * args.interval,
            status: response.status.as_u16(),
            cache_status: response
                .header(header_names::X_CACHE_STATUS)
                .unwrap_or_default()
                .to_string(),
            age: response.header(header_names::AGE).map(str::to_string),
            origin_fetches: origin.fetches(),
        });
    }

    Ok(Simulation {
        steps,
        metrics: cache.metrics().snapshot(),
    })
}
