//! Offline policy evaluation.
//!
//! Stores a synthetic origin response, moves a manual clock forward by
//! `--age` seconds and reports what the cache would do with the next request.

use std::time::Duration;

use anyhow::{Context as _, Result};
use edge_cache::{
    CacheControl, CachePolicy, FreshnessSource, PolicyDecision, RequestNormalizer,
};
use edge_core::{from_unix_secs, CacheConfig, Clock, ManualClock, SystemClock};
use edge_data::OriginResponse;
use http::{HeaderName, StatusCode};
use serde::Serialize;

use super::{build_request, EvaluateArgs};
use crate::context::Context;
use crate::output::format_duration;

/// What the cache would do with a response and a later request.
#[derive(Debug, Serialize)]
pub struct Evaluation {
    pub key: String,
    pub url: String,
    /// Why the response would not be written, if it would not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_storable: Option<String>,
    pub freshness_lifetime: u64,
    pub freshness_source: FreshnessSource,
    /// Seconds the store keeps the entry; zero when it is never written.
    pub store_ttl: u64,
    /// Age of the entry when the later request arrives.
    pub age: u64,
    /// Decision label, e.g. `fresh` or `must_revalidate`.
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Run the evaluate command.
pub async fn run(args: EvaluateArgs, ctx: &Context) -> Result<()> {
    let stored_at = SystemClock.now_secs();
    let eval = evaluate(&ctx.config, &args, &ManualClock::at(stored_at))?;

    if ctx.output.is_json() {
        ctx.output.json(&eval);
        return Ok(());
    }

    ctx.output.header("Storage");
    ctx.output.kv("key", &eval.key);
    ctx.output.kv("url", &eval.url);
    match &eval.not_storable {
        Some(reason) => ctx.output.kv("stored", &format!("no ({})", reason)),
        None if eval.store_ttl == 0 => ctx.output.kv("stored", "no (already stale)"),
        None => ctx.output.kv("stored", &format!("yes, for {}", format_duration(eval.store_ttl))),
    }
    ctx.output.kv(
        "freshness",
        &format!(
            "{} ({})",
            format_duration(eval.freshness_lifetime),
            eval.freshness_source
        ),
    );

    ctx.output.header(&format!("Request after {}", format_duration(args.age)));
    ctx.output.kv("age", &format_duration(eval.age));
    ctx.output.kv("decision", &eval.decision);
    if let Some(detail) = &eval.detail {
        ctx.output.kv("detail", detail);
    }

    Ok(())
}

/// Simulate storing the response at `clock`'s current time and answering
/// the request `args.age` seconds later.
pub fn evaluate(config: &CacheConfig, args: &EvaluateArgs, clock: &ManualClock) -> Result<Evaluation> {
    let request = build_request(&args.url, &args.method, &args.request_headers)?;
    let identity = RequestNormalizer::from_config(config).normalize(&request)?;
    let policy = CachePolicy::from_config(config);

    let status = StatusCode::from_u16(args.status)
        .with_context(|| format!("Invalid status: {}", args.status))?;
    let mut origin = OriginResponse::new(status, Vec::new(), from_unix_secs(clock.now_secs()));
    for (name, value) in &args.response_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name: {}", name))?;
        origin = origin.with_header(name, value);
    }

    // The response is evaluated as the answer to a plain request, so the
    // later request's directives do not affect whether it was stored.
    let storability = policy.storability(&request.method, &http::HeaderMap::new(), &origin);
    let entry = policy.entry_from(&origin);
    let store_ttl = match storability {
        Ok(()) => policy.store_ttl(&entry).as_secs(),
        Err(_) => 0,
    };

    clock.advance(Duration::from_secs(args.age));
    let now = clock.now_secs();
    let age = entry.current_age(now);

    let request_cc = CacheControl::from_request_headers(&request.headers);
    let decision = match policy.check_request(&request.method, &request_cc) {
        Some(reason) => PolicyDecision::Bypass { reason },
        None => {
            // The store evicts the entry once its TTL runs out.
            let cached = (args.age < store_ttl).then(|| entry.clone());
            policy.evaluate(&request_cc, cached, now)
        }
    };

    Ok(Evaluation {
        key: identity.key.to_string(),
        url: identity.url.to_string(),
        not_storable: storability.err().map(|reason| reason.to_string()),
        freshness_lifetime: entry.freshness_lifetime,
        freshness_source: entry.freshness_source,
        store_ttl,
        age,
        decision: decision.kind().to_string(),
        detail: describe(&decision),
    })
}

fn describe(decision: &PolicyDecision) -> Option<String> {
    match decision {
        PolicyDecision::FreshHit { stale: true, .. } => Some("served stale under max-stale".into()),
        PolicyDecision::FreshHit { .. } => None,
        PolicyDecision::MustRevalidate { validators, .. } => {
            let mut parts = Vec::new();
            if let Some(etag) = &validators.if_none_match {
                parts.push(format!("If-None-Match: {}", etag));
            }
            if let Some(date) = &validators.if_modified_since {
                parts.push(format!("If-Modified-Since: {}", date));
            }
            Some(parts.join(", "))
        }
        PolicyDecision::Miss { reason } => Some(format!("{:?}", reason)),
        PolicyDecision::Bypass { reason } => Some(format!("{:?}", reason)),
        PolicyDecision::Unsatisfiable => Some("504 Gateway Timeout".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    fn args(response: &[(&str, &str)], request: &[(&str, &str)], age: u64) -> EvaluateArgs {
        EvaluateArgs {
            url: "https://example.com/products?utm_source=mail".to_string(),
            method: "GET".to_string(),
            request_headers: pairs(request),
            response_headers: pairs(response),
            status: 200,
            age,
        }
    }

    fn run_eval(args: &EvaluateArgs) -> Evaluation {
        evaluate(&CacheConfig::default(), args, &ManualClock::at(1_700_000_000)).unwrap()
    }

    #[test]
    fn test_fresh_within_max_age() {
        let eval = run_eval(&args(&[("Cache-Control", "max-age=60")], &[], 30));
        assert_eq!(eval.decision, "fresh");
        assert_eq!(eval.age, 30);
        assert_eq!(eval.freshness_lifetime, 60);
        assert_eq!(eval.freshness_source, FreshnessSource::MaxAge);
        assert_eq!(eval.url, "https://example.com/products");
    }

    #[test]
    fn test_stale_with_etag_revalidates() {
        let eval = run_eval(&args(
            &[("Cache-Control", "max-age=60"), ("ETag", "\"v1\"")],
            &[],
            90,
        ));
        assert_eq!(eval.decision, "must_revalidate");
        assert_eq!(eval.detail.as_deref(), Some("If-None-Match: \"v1\""));
        assert_eq!(eval.store_ttl, 60 + 300);
    }

    #[test]
    fn test_no_store_is_never_stored() {
        let eval = run_eval(&args(&[("Cache-Control", "no-store")], &[], 0));
        assert_eq!(eval.not_storable.as_deref(), Some("no-store"));
        assert_eq!(eval.store_ttl, 0);
        assert_eq!(eval.decision, "miss");
    }

    #[test]
    fn test_only_if_cached_after_eviction() {
        let eval = run_eval(&args(
            &[("Cache-Control", "max-age=5")],
            &[("Cache-Control", "only-if-cached")],
            10,
        ));
        assert_eq!(eval.decision, "unsatisfiable");
    }

    #[test]
    fn test_request_no_cache_bypasses() {
        let eval = run_eval(&args(&[], &[("Pragma", "no-cache")], 0));
        assert_eq!(eval.decision, "bypass");
        assert_eq!(eval.freshness_source, FreshnessSource::Default);
    }
}
