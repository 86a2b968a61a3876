//! Cache policy evaluation.
//!
//! Decides, for one request, whether a stored entry can be served as-is,
//! must be revalidated with the origin, or cannot be used at all, and whether
//! an origin response may be written to the store. Everything here is pure:
//! no I/O, no clock reads.

use std::time::Duration;

use edge_core::CacheConfig;
use edge_data::{ConditionalHeaders, OriginResponse};
use http::header::{AUTHORIZATION, SET_COOKIE, VARY};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};

use crate::directives::CacheControl;
use crate::entry::CacheEntry;
use crate::freshness::FreshnessParams;
use crate::vary::HeaderCanonicalizer;

/// Status codes a shared cache may store without explicit freshness.
const STORABLE_STATUSES: &[u16] = &[200, 203, 204, 206, 300, 301, 308, 404, 405, 410, 414, 501];

/// Why the store was not used to answer a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissReason {
    /// Nothing stored under the key (or the store could not be read).
    NoEntry,
    /// The entry is stale and carries no validator.
    StaleWithoutValidators,
    /// The request's caching directives could not be trusted.
    AmbiguousDirectives,
}

/// Why caching was skipped entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BypassReason {
    /// Only GET and HEAD are cached.
    MethodNotCacheable,
    /// The request said `no-store`.
    RequestNoStore,
    /// The request said `no-cache` (or `Pragma: no-cache`).
    RequestNoCache,
    /// The URL could not be canonicalized.
    InvalidUrl,
}

/// Why an origin response was not written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotStorable {
    Method,
    Status(u16),
    NoStore,
    NoCache,
    Private,
    AmbiguousDirectives,
    VaryNotCovered,
    Authorization,
    SetCookie,
}

impl std::fmt::Display for NotStorable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Method => write!(f, "method not cacheable"),
            Self::Status(code) => write!(f, "status {} not cacheable", code),
            Self::NoStore => write!(f, "no-store"),
            Self::NoCache => write!(f, "no-cache"),
            Self::Private => write!(f, "private"),
            Self::AmbiguousDirectives => write!(f, "ambiguous directives"),
            Self::VaryNotCovered => write!(f, "vary not covered by key"),
            Self::Authorization => write!(f, "authorized request"),
            Self::SetCookie => write!(f, "set-cookie without public"),
        }
    }
}

/// Outcome of evaluating a request against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    /// Serve the stored entry without contacting the origin.
    ///
    /// `stale` is set when the client accepted staleness via `max-stale`.
    FreshHit {
        entry: CacheEntry,
        age: u64,
        stale: bool,
    },
    /// Send a conditional request; a 304 refreshes `entry`.
    MustRevalidate {
        entry: CacheEntry,
        validators: ConditionalHeaders,
    },
    /// Fetch a full response.
    Miss { reason: MissReason },
    /// Fetch without reading or writing the store.
    Bypass { reason: BypassReason },
    /// `only-if-cached` could not be honored; answer 504 without fetching.
    Unsatisfiable,
}

impl PolicyDecision {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FreshHit { stale: false, .. } => "fresh",
            Self::FreshHit { stale: true, .. } => "stale",
            Self::MustRevalidate { .. } => "must_revalidate",
            Self::Miss { .. } => "miss",
            Self::Bypass { .. } => "bypass",
            Self::Unsatisfiable => "unsatisfiable",
        }
    }
}

/// Policy evaluator configured once at startup.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    vary: HeaderCanonicalizer,
    freshness: FreshnessParams,
    revalidation_window: Duration,
}

impl CachePolicy {
    /// Create a policy from its parts.
    pub fn new(vary: HeaderCanonicalizer, freshness: FreshnessParams) -> Self {
        Self {
            vary,
            freshness,
            revalidation_window: Duration::ZERO,
        }
    }

    /// Create from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            HeaderCanonicalizer::from_config(config),
            FreshnessParams::from_config(config),
        )
        .with_revalidation_window(config.revalidation_window())
    }

    /// Keep revalidatable entries in the store this much longer.
    pub fn with_revalidation_window(mut self, window: Duration) -> Self {
        self.revalidation_window = window;
        self
    }

    /// Freshness parameters used for new entries.
    pub fn freshness(&self) -> &FreshnessParams {
        &self.freshness
    }

    /// Decide whether the store is skipped before any lookup.
    pub fn check_request(&self, method: &Method, request_cc: &CacheControl) -> Option<BypassReason> {
        if !is_cacheable_method(method) {
            Some(BypassReason::MethodNotCacheable)
        } else if request_cc.no_store {
            Some(BypassReason::RequestNoStore)
        } else if request_cc.no_cache {
            Some(BypassReason::RequestNoCache)
        } else {
            None
        }
    }

    /// Evaluate a looked-up entry against the request directives at `now`.
    pub fn evaluate(
        &self,
        request_cc: &CacheControl,
        entry: Option<CacheEntry>,
        now: u64,
    ) -> PolicyDecision {
        if let Err(e) = request_cc.ensure_consistent() {
            tracing::debug!(error = %e, "Ignoring stored entry");
            return if request_cc.only_if_cached {
                PolicyDecision::Unsatisfiable
            } else {
                PolicyDecision::Miss {
                    reason: MissReason::AmbiguousDirectives,
                }
            };
        }

        let Some(entry) = entry else {
            return if request_cc.only_if_cached {
                PolicyDecision::Unsatisfiable
            } else {
                PolicyDecision::Miss {
                    reason: MissReason::NoEntry,
                }
            };
        };

        let age = entry.current_age(now);
        if let Some(stale) = satisfies_without_revalidation(request_cc, &entry, age) {
            return PolicyDecision::FreshHit { entry, age, stale };
        }

        if request_cc.only_if_cached {
            PolicyDecision::Unsatisfiable
        } else if entry.has_validators() {
            let validators = entry.validators();
            PolicyDecision::MustRevalidate { entry, validators }
        } else {
            PolicyDecision::Miss {
                reason: MissReason::StaleWithoutValidators,
            }
        }
    }

    /// Whether an origin response to this request may be written to the store.
    pub fn storability(
        &self,
        method: &Method,
        request_headers: &HeaderMap,
        response: &OriginResponse,
    ) -> Result<(), NotStorable> {
        if !is_cacheable_method(method) {
            return Err(NotStorable::Method);
        }

        let status = response.status.as_u16();
        if !STORABLE_STATUSES.contains(&status) {
            return Err(NotStorable::Status(status));
        }

        let cc = self.check_response_headers(&response.headers)?;

        if request_headers.contains_key(AUTHORIZATION)
            && !(cc.public || cc.s_maxage.is_some() || cc.must_revalidate)
        {
            return Err(NotStorable::Authorization);
        }

        Ok(())
    }

    /// Restrictions a response's own headers place on storing it, whatever
    /// the request. Returns the parsed directives when storing is allowed.
    ///
    /// `private="field"` and `no-cache="field"` count as unqualified: the
    /// whole response is refused rather than stored with fields stripped.
    pub fn check_response_headers(&self, headers: &HeaderMap) -> Result<CacheControl, NotStorable> {
        let cc = CacheControl::from_headers(headers);
        if cc.ensure_consistent().is_err() {
            return Err(NotStorable::AmbiguousDirectives);
        }
        if cc.no_store {
            return Err(NotStorable::NoStore);
        }
        if cc.no_cache {
            return Err(NotStorable::NoCache);
        }
        if cc.private {
            return Err(NotStorable::Private);
        }

        for vary in headers.get_all(VARY) {
            let covered = vary
                .to_str()
                .map(|v| self.vary.covers_vary(v))
                .unwrap_or(false);
            if !covered {
                return Err(NotStorable::VaryNotCovered);
            }
        }

        if headers.contains_key(SET_COOKIE) && !cc.public {
            return Err(NotStorable::SetCookie);
        }

        Ok(cc)
    }

    /// Build the entry to store for an origin response.
    pub fn entry_from(&self, response: &OriginResponse) -> CacheEntry {
        CacheEntry::from_origin(response, &self.freshness)
    }

    /// Apply a 304 answer to a stored entry.
    pub fn refresh(&self, entry: &mut CacheEntry, not_modified: &OriginResponse) {
        entry.refresh_from_not_modified(not_modified, &self.freshness);
    }

    /// Whether an entry refreshed by a 304 may stay in the store. The merged
    /// headers face the same checks as a fresh 200.
    pub fn refreshed_storability(&self, entry: &CacheEntry) -> Result<(), NotStorable> {
        self.check_response_headers(&entry.header_map()).map(|_| ())
    }

    /// TTL handed to the store for `entry`.
    pub fn store_ttl(&self, entry: &CacheEntry) -> Duration {
        entry.store_ttl(self.revalidation_window)
    }
}

/// Only GET and HEAD responses are cached.
pub fn is_cacheable_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// `Some(stale)` when the entry may be served without contacting the origin.
fn satisfies_without_revalidation(
    request_cc: &CacheControl,
    entry: &CacheEntry,
    age: u64,
) -> Option<bool> {
    let lifetime = entry.freshness_lifetime;

    if request_cc.max_age.is_some_and(|max_age| age > max_age) {
        return None;
    }
    if let Some(min_fresh) = request_cc.min_fresh {
        if lifetime.saturating_sub(age) < min_fresh {
            return None;
        }
    }

    if age < lifetime {
        return Some(false);
    }

    let stale_by = age - lifetime;
    let stale_allowed = !entry.forbids_stale
        && request_cc
            .max_stale
            .is_some_and(|max_stale| max_stale.permits(stale_by));
    stale_allowed.then_some(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_core::from_unix_secs;
    use http::header::{CACHE_CONTROL, ETAG};
    use http::{HeaderValue, StatusCode};

    const T0: u64 = 1_700_000_000;

    fn policy() -> CachePolicy {
        CachePolicy::new(
            HeaderCanonicalizer::new(["accept-encoding"], Vec::<String>::new()),
            FreshnessParams::default(),
        )
    }

    fn response(cache_control: &str) -> OriginResponse {
        OriginResponse::new(StatusCode::OK, "body", from_unix_secs(T0))
            .with_header(CACHE_CONTROL, cache_control)
    }

    fn entry(response: &OriginResponse) -> CacheEntry {
        policy().entry_from(response)
    }

    fn request_cc(value: &str) -> CacheControl {
        CacheControl::parse(value)
    }

    #[test]
    fn test_no_entry_is_miss() {
        let decision = policy().evaluate(&CacheControl::default(), None, T0);
        assert_eq!(
            decision,
            PolicyDecision::Miss {
                reason: MissReason::NoEntry
            }
        );
    }

    #[test]
    fn test_max_age_lifecycle_with_etag() {
        let stored = entry(&response("max-age=10").with_header(ETAG, "\"abc\""));
        let p = policy();

        let fresh = p.evaluate(&CacheControl::default(), Some(stored.clone()), T0 + 5);
        assert!(matches!(fresh, PolicyDecision::FreshHit { age: 5, stale: false, .. }));

        let stale = p.evaluate(&CacheControl::default(), Some(stored), T0 + 11);
        match stale {
            PolicyDecision::MustRevalidate { validators, .. } => {
                assert_eq!(validators.if_none_match.as_deref(), Some("\"abc\""));
            }
            other => panic!("expected revalidation, got {:?}", other),
        }
    }

    #[test]
    fn test_max_age_lifecycle_without_validators() {
        let stored = entry(&response("max-age=10"));
        let decision = policy().evaluate(&CacheControl::default(), Some(stored), T0 + 11);
        assert_eq!(
            decision,
            PolicyDecision::Miss {
                reason: MissReason::StaleWithoutValidators
            }
        );
    }

    #[test]
    fn test_age_equal_to_lifetime_is_not_fresh() {
        let stored = entry(&response("max-age=10"));
        let decision = policy().evaluate(&CacheControl::default(), Some(stored), T0 + 10);
        assert!(!matches!(decision, PolicyDecision::FreshHit { .. }));
    }

    #[test]
    fn test_request_max_age_forces_revalidation() {
        let stored = entry(&response("max-age=60").with_header(ETAG, "\"abc\""));
        let decision = policy().evaluate(&request_cc("max-age=3"), Some(stored), T0 + 5);
        assert!(matches!(decision, PolicyDecision::MustRevalidate { .. }));
    }

    #[test]
    fn test_min_fresh() {
        let stored = entry(&response("max-age=60"));
        let p = policy();
        assert!(matches!(
            p.evaluate(&request_cc("min-fresh=10"), Some(stored.clone()), T0 + 50),
            PolicyDecision::FreshHit { .. }
        ));
        assert!(matches!(
            p.evaluate(&request_cc("min-fresh=10"), Some(stored), T0 + 51),
            PolicyDecision::Miss { .. }
        ));
    }

    #[test]
    fn test_max_stale_serves_stale() {
        let stored = entry(&response("max-age=10"));
        let p = policy();
        assert!(matches!(
            p.evaluate(&request_cc("max-stale=5"), Some(stored.clone()), T0 + 15),
            PolicyDecision::FreshHit { stale: true, .. }
        ));
        assert!(matches!(
            p.evaluate(&request_cc("max-stale=5"), Some(stored.clone()), T0 + 16),
            PolicyDecision::Miss { .. }
        ));
        assert!(matches!(
            p.evaluate(&request_cc("max-stale"), Some(stored), T0 + 10_000),
            PolicyDecision::FreshHit { stale: true, .. }
        ));
    }

    #[test]
    fn test_must_revalidate_overrides_max_stale() {
        let stored = entry(&response("max-age=10, must-revalidate"));
        let decision = policy().evaluate(&request_cc("max-stale"), Some(stored), T0 + 11);
        assert!(matches!(decision, PolicyDecision::Miss { .. }));
    }

    #[test]
    fn test_only_if_cached() {
        let p = policy();
        let cc = request_cc("only-if-cached");
        assert_eq!(p.evaluate(&cc, None, T0), PolicyDecision::Unsatisfiable);

        let stored = entry(&response("max-age=10").with_header(ETAG, "\"abc\""));
        assert!(matches!(
            p.evaluate(&cc, Some(stored.clone()), T0 + 1),
            PolicyDecision::FreshHit { .. }
        ));
        assert_eq!(p.evaluate(&cc, Some(stored), T0 + 11), PolicyDecision::Unsatisfiable);
    }

    #[test]
    fn test_malformed_request_directives_skip_entry() {
        let stored = entry(&response("max-age=60"));
        let decision = policy().evaluate(&request_cc("max-age=soon"), Some(stored), T0 + 1);
        assert_eq!(
            decision,
            PolicyDecision::Miss {
                reason: MissReason::AmbiguousDirectives
            }
        );
    }

    #[test]
    fn test_check_request() {
        let p = policy();
        assert_eq!(p.check_request(&Method::GET, &CacheControl::default()), None);
        assert_eq!(p.check_request(&Method::HEAD, &CacheControl::default()), None);
        assert_eq!(
            p.check_request(&Method::POST, &CacheControl::default()),
            Some(BypassReason::MethodNotCacheable)
        );
        assert_eq!(
            p.check_request(&Method::GET, &request_cc("no-store")),
            Some(BypassReason::RequestNoStore)
        );
        assert_eq!(
            p.check_request(&Method::GET, &request_cc("no-cache")),
            Some(BypassReason::RequestNoCache)
        );
    }

    #[test]
    fn test_storability_rejects_uncacheable_responses() {
        let p = policy();
        let none = HeaderMap::new();
        let check = |r: &OriginResponse| p.storability(&Method::GET, &none, r);

        assert_eq!(check(&response("max-age=10")), Ok(()));
        assert_eq!(check(&response("no-store")), Err(NotStorable::NoStore));
        assert_eq!(check(&response("no-cache")), Err(NotStorable::NoCache));
        assert_eq!(check(&response("private, max-age=10")), Err(NotStorable::Private));
        assert_eq!(
            check(&response("max-age=1, max-age=2")),
            Err(NotStorable::AmbiguousDirectives)
        );

        let mut server_error = response("max-age=10");
        server_error.status = StatusCode::INTERNAL_SERVER_ERROR;
        assert_eq!(check(&server_error), Err(NotStorable::Status(500)));

        assert_eq!(
            p.storability(&Method::POST, &none, &response("max-age=10")),
            Err(NotStorable::Method)
        );
    }

    #[test]
    fn test_storability_checks_vary() {
        let p = policy();
        let none = HeaderMap::new();
        let covered = response("max-age=10").with_header(VARY, "Accept-Encoding");
        assert_eq!(p.storability(&Method::GET, &none, &covered), Ok(()));

        let uncovered = response("max-age=10").with_header(VARY, "User-Agent");
        assert_eq!(
            p.storability(&Method::GET, &none, &uncovered),
            Err(NotStorable::VaryNotCovered)
        );

        let star = response("max-age=10").with_header(VARY, "*");
        assert_eq!(
            p.storability(&Method::GET, &none, &star),
            Err(NotStorable::VaryNotCovered)
        );
    }

    #[test]
    fn test_storability_authorization() {
        let p = policy();
        let mut auth = HeaderMap::new();
        auth.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t"));

        assert_eq!(
            p.storability(&Method::GET, &auth, &response("max-age=10")),
            Err(NotStorable::Authorization)
        );
        assert_eq!(
            p.storability(&Method::GET, &auth, &response("public, max-age=10")),
            Ok(())
        );
        assert_eq!(
            p.storability(&Method::GET, &auth, &response("s-maxage=10")),
            Ok(())
        );
    }

    #[test]
    fn test_storability_set_cookie() {
        let p = policy();
        let none = HeaderMap::new();
        let personal = response("max-age=10").with_header(SET_COOKIE, "session=1");
        assert_eq!(
            p.storability(&Method::GET, &none, &personal),
            Err(NotStorable::SetCookie)
        );
        let public = response("public, max-age=10").with_header(SET_COOKIE, "theme=dark");
        assert_eq!(p.storability(&Method::GET, &none, &public), Ok(()));
    }

    #[test]
    fn test_store_ttl_includes_window_for_validators() {
        let p = policy().with_revalidation_window(Duration::from_secs(100));
        let plain = p.entry_from(&response("max-age=10"));
        let tagged = p.entry_from(&response("max-age=10").with_header(ETAG, "\"x\""));
        assert_eq!(p.store_ttl(&plain), Duration::from_secs(10));
        assert_eq!(p.store_ttl(&tagged), Duration::from_secs(110));
    }

    fn refreshed_by(cache_control: &str) -> (CachePolicy, CacheEntry) {
        let p = policy();
        let mut stored = p.entry_from(&response("max-age=10").with_header(ETAG, "\"x\""));
        assert_eq!(p.refreshed_storability(&stored), Ok(()));

        let not_modified = OriginResponse::new(StatusCode::NOT_MODIFIED, "", from_unix_secs(T0 + 20))
            .with_header(CACHE_CONTROL, cache_control);
        p.refresh(&mut stored, &not_modified);
        (p, stored)
    }

    #[test]
    fn test_refreshed_entry_can_lose_storability() {
        let (p, stored) = refreshed_by("no-store");
        assert_eq!(p.refreshed_storability(&stored), Err(NotStorable::NoStore));

        let (p, stored) = refreshed_by("private, max-age=10");
        assert_eq!(p.refreshed_storability(&stored), Err(NotStorable::Private));
    }

    #[test]
    fn test_refresh_adding_no_cache_loses_storability() {
        let (p, stored) = refreshed_by("no-cache");
        assert_eq!(p.refreshed_storability(&stored), Err(NotStorable::NoCache));
    }

    #[test]
    fn test_refresh_adding_uncovered_vary_loses_storability() {
        let p = policy();
        let mut stored = p.entry_from(&response("max-age=10").with_header(ETAG, "\"x\""));
        let not_modified = OriginResponse::new(StatusCode::NOT_MODIFIED, "", from_unix_secs(T0 + 20))
            .with_header(VARY, "User-Agent");
        p.refresh(&mut stored, &not_modified);
        assert_eq!(p.refreshed_storability(&stored), Err(NotStorable::VaryNotCovered));
    }

    #[test]
    fn test_plain_refresh_stays_storable() {
        let (p, stored) = refreshed_by("max-age=30");
        assert_eq!(p.refreshed_storability(&stored), Ok(()));
    }

    #[test]
    fn test_decision_kind() {
        assert_eq!(PolicyDecision::Unsatisfiable.kind(), "unsatisfiable");
        assert_eq!(
            PolicyDecision::Bypass {
                reason: BypassReason::InvalidUrl
            }
            .kind(),
            "bypass"
        );
    }
}
