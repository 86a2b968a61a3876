//! End-to-end tests of the cache orchestrator against an in-memory store and
//! a scripted origin, on simulated time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use edge_cache::{CacheEntry, CacheError, CacheKey, CacheResult, CacheStore, EdgeCache, InMemoryStore};
use edge_core::{CacheConfig, CacheRequest, Clock, ManualClock};
use edge_data::{ConditionalHeaders, FetchError, OriginFetcher, OriginResponse};
use http::header::{CACHE_CONTROL, ETAG, SET_COOKIE, VARY};
use http::{HeaderName, Method, StatusCode};

const T0: u64 = 1_700_000_000;

enum Reply {
    Status(StatusCode, Vec<(&'static str, &'static str)>, &'static str),
    Fail(FetchError),
}

fn ok(headers: Vec<(&'static str, &'static str)>, body: &'static str) -> Reply {
    Reply::Status(StatusCode::OK, headers, body)
}

type Responder = Box<dyn Fn(&CacheRequest, SystemTime) -> OriginResponse + Send + Sync>;

/// Origin that answers from a script (or builds each answer from the
/// request) and records what it was asked.
struct ScriptedOrigin {
    clock: ManualClock,
    replies: Mutex<VecDeque<Reply>>,
    responder: Option<Responder>,
    calls: AtomicUsize,
    conditionals: Mutex<Vec<Option<ConditionalHeaders>>>,
    delay: Duration,
}

impl ScriptedOrigin {
    fn new(clock: &ManualClock, replies: Vec<Reply>) -> Self {
        Self {
            clock: clock.clone(),
            replies: Mutex::new(replies.into()),
            responder: None,
            calls: AtomicUsize::new(0),
            conditionals: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_responder<F>(mut self, respond: F) -> Self
    where
        F: Fn(&CacheRequest, SystemTime) -> OriginResponse + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(respond));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_conditional(&self) -> Option<ConditionalHeaders> {
        self.conditionals.lock().unwrap().last().cloned().flatten()
    }
}

#[async_trait]
impl OriginFetcher for ScriptedOrigin {
    async fn fetch(
        &self,
        request: &CacheRequest,
        conditional: Option<&ConditionalHeaders>,
    ) -> Result<OriginResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.conditionals.lock().unwrap().push(conditional.cloned());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(respond) = &self.responder {
            return Ok(respond(request, self.clock.now()));
        }

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Status(status, headers, body)) => {
                let mut response = OriginResponse::new(status, body, self.clock.now());
                for (name, value) in headers {
                    response = response.with_header(HeaderName::from_static(name), value);
                }
                Ok(response)
            }
            Some(Reply::Fail(e)) => Err(e),
            None => Err(FetchError::Request("unscripted origin call".into())),
        }
    }
}

/// Store whose every operation fails.
struct BrokenStore;

#[async_trait]
impl CacheStore for BrokenStore {
    async fn get(&self, _key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        Err(CacheError::StoreUnavailable("connection refused".into()))
    }

    async fn set(&self, _key: &CacheKey, _entry: CacheEntry, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::StoreUnavailable("connection refused".into()))
    }
}

struct Harness {
    clock: ManualClock,
    store: Arc<InMemoryStore>,
    origin: Arc<ScriptedOrigin>,
    cache: EdgeCache<Arc<InMemoryStore>, Arc<ScriptedOrigin>>,
}

fn harness(config: CacheConfig, replies: Vec<Reply>) -> Harness {
    let clock = ManualClock::at(T0);
    harness_with_origin(config, ScriptedOrigin::new(&clock, replies), clock)
}

fn harness_with_origin(config: CacheConfig, origin: ScriptedOrigin, clock: ManualClock) -> Harness {
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let store = Arc::new(InMemoryStore::with_clock(shared_clock.clone()));
    let origin = Arc::new(origin);
    let cache = EdgeCache::new(&config, store.clone(), origin.clone()).with_clock(shared_clock);
    Harness {
        clock,
        store,
        origin,
        cache,
    }
}

fn status(response: &edge_core::HttpResponse) -> Option<&str> {
    response.header("x-cache-status")
}

#[tokio::test]
async fn test_fresh_then_revalidated_with_etag() {
    let h = harness(
        CacheConfig::default(),
        vec![
            ok(vec![("cache-control", "max-age=10"), ("etag", "\"v1\"")], "page"),
            Reply::Status(StatusCode::NOT_MODIFIED, vec![], ""),
        ],
    );
    let url = "https://example.com/a";

    let first = h.cache.handle(CacheRequest::get(url)).await.unwrap();
    assert_eq!(status(&first), Some("MISS"));
    assert_eq!(first.body, b"page");

    h.clock.advance(Duration::from_secs(5));
    let hit = h.cache.handle(CacheRequest::get(url)).await.unwrap();
    assert_eq!(status(&hit), Some("HIT"));
    assert_eq!(hit.header("age"), Some("5"));
    assert_eq!(h.origin.calls(), 1);

    h.clock.advance(Duration::from_secs(6));
    let revalidated = h.cache.handle(CacheRequest::get(url)).await.unwrap();
    assert_eq!(status(&revalidated), Some("REVALIDATED"));
    assert_eq!(revalidated.status, StatusCode::OK);
    assert_eq!(revalidated.body, b"page");
    assert_eq!(h.origin.calls(), 2);
    assert_eq!(
        h.origin.last_conditional().and_then(|c| c.if_none_match),
        Some("\"v1\"".to_string())
    );

    // The 304 restarted freshness.
    h.clock.advance(Duration::from_secs(1));
    let again = h.cache.handle(CacheRequest::get(url)).await.unwrap();
    assert_eq!(status(&again), Some("HIT"));
    assert_eq!(again.header("age"), Some("1"));
    assert_eq!(h.origin.calls(), 2);

    let snap = h.cache.metrics().snapshot();
    assert_eq!(snap.hits, 2);
    assert_eq!(snap.revalidations, 1);
    assert_eq!(snap.not_modified, 1);
}

#[tokio::test]
async fn test_stale_without_validators_refetches() {
    let h = harness(
        CacheConfig::default(),
        vec![
            ok(vec![("cache-control", "max-age=10")], "one"),
            ok(vec![("cache-control", "max-age=10")], "two"),
        ],
    );
    let url = "https://example.com/a";

    h.cache.handle(CacheRequest::get(url)).await.unwrap();
    h.clock.advance(Duration::from_secs(11));
    let second = h.cache.handle(CacheRequest::get(url)).await.unwrap();

    assert_eq!(status(&second), Some("MISS"));
    assert_eq!(second.body, b"two");
    assert_eq!(h.origin.calls(), 2);
    assert!(h.origin.last_conditional().is_none());
}

#[tokio::test]
async fn test_equivalent_urls_share_entry() {
    let h = harness(
        CacheConfig::default(),
        vec![ok(vec![("cache-control", "max-age=60")], "shared")],
    );

    let first = h
        .cache
        .handle(CacheRequest::get("https://example.com/a?utm_source=x&b=2&a=1"))
        .await
        .unwrap();
    let second = h
        .cache
        .handle(CacheRequest::get("https://example.com/a?a=1&b=2").with_header("user-agent", "other"))
        .await
        .unwrap();

    assert_eq!(status(&first), Some("MISS"));
    assert_eq!(status(&second), Some("HIT"));
    assert_eq!(h.origin.calls(), 1);
}

#[tokio::test]
async fn test_default_ttl_applies_without_directives() {
    let h = harness(CacheConfig::default(), vec![ok(vec![], "plain")]);
    let url = "https://example.com/plain";

    h.cache.handle(CacheRequest::get(url)).await.unwrap();
    h.clock.advance(Duration::from_secs(9));
    let hit = h.cache.handle(CacheRequest::get(url)).await.unwrap();
    assert_eq!(status(&hit), Some("HIT"));
    assert_eq!(h.origin.calls(), 1);
}

#[tokio::test]
async fn test_response_no_store_is_never_written() {
    let h = harness(
        CacheConfig::default(),
        vec![
            ok(vec![("cache-control", "no-store")], "secret"),
            ok(vec![("cache-control", "no-store")], "secret"),
        ],
    );
    let url = "https://example.com/account";

    let first = h.cache.handle(CacheRequest::get(url)).await.unwrap();
    assert_eq!(first.body, b"secret");
    assert!(h.store.is_empty());

    h.cache.handle(CacheRequest::get(url)).await.unwrap();
    assert_eq!(h.origin.calls(), 2);
    assert!(h.store.is_empty());
    assert_eq!(h.cache.metrics().snapshot().stores_skipped, 2);
}

#[tokio::test]
async fn test_request_no_store_bypasses() {
    let h = harness(
        CacheConfig::default(),
        vec![ok(vec![("cache-control", "max-age=60")], "body")],
    );

    let response = h
        .cache
        .handle(CacheRequest::get("https://example.com/").with_header("cache-control", "no-store"))
        .await
        .unwrap();
    assert_eq!(status(&response), Some("BYPASS"));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_only_if_cached_never_fetches() {
    let h = harness(
        CacheConfig::default(),
        vec![ok(vec![("cache-control", "max-age=10")], "body")],
    );
    let only_if_cached = || {
        CacheRequest::get("https://example.com/x").with_header("cache-control", "only-if-cached")
    };

    let absent = h.cache.handle(only_if_cached()).await.unwrap();
    assert_eq!(absent.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(status(&absent), Some("UNSATISFIABLE"));
    assert_eq!(h.origin.calls(), 0);

    h.cache.handle(CacheRequest::get("https://example.com/x")).await.unwrap();
    assert_eq!(h.origin.calls(), 1);

    let fresh = h.cache.handle(only_if_cached()).await.unwrap();
    assert_eq!(status(&fresh), Some("HIT"));

    h.clock.advance(Duration::from_secs(30));
    let stale = h.cache.handle(only_if_cached()).await.unwrap();
    assert_eq!(stale.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(h.origin.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_fetch() {
    let clock = ManualClock::at(T0);
    let origin = ScriptedOrigin::new(
        &clock,
        vec![ok(vec![("cache-control", "max-age=60")], "once")],
    )
    .with_delay(Duration::from_millis(100));
    let h = harness_with_origin(CacheConfig::default(), origin, clock);

    let requests = (0..10).map(|_| h.cache.handle(CacheRequest::get("https://example.com/hot")));
    let responses = futures::future::join_all(requests).await;

    assert_eq!(h.origin.calls(), 1);
    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"once");
    }
    assert_eq!(h.cache.metrics().snapshot().coalesced, 9);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_followers_share_origin_failure() {
    let clock = ManualClock::at(T0);
    let origin = ScriptedOrigin::new(
        &clock,
        vec![Reply::Fail(FetchError::Connection("reset".into()))],
    )
    .with_delay(Duration::from_millis(100));
    let h = harness_with_origin(CacheConfig::default(), origin, clock);

    let requests = (0..3).map(|_| h.cache.handle(CacheRequest::get("https://example.com/down")));
    let responses = futures::future::join_all(requests).await;

    assert_eq!(h.origin.calls(), 1);
    for response in responses {
        assert!(matches!(response, Err(CacheError::OriginUnavailable(_))));
    }
}

/// Origin that renders a per-session page with the given caching headers.
fn session_origin(clock: &ManualClock, headers: &'static [(&'static str, &'static str)]) -> ScriptedOrigin {
    ScriptedOrigin::new(clock, vec![])
        .with_delay(Duration::from_millis(100))
        .with_responder(move |request, at| {
            let cookie = request.header("cookie").unwrap_or_default().to_string();
            let mut response = OriginResponse::new(StatusCode::OK, format!("account page for {}", cookie), at)
                .with_header(SET_COOKIE, &format!("{}; Path=/", cookie));
            for &(name, value) in headers {
                response = response.with_header(HeaderName::from_static(name), value);
            }
            response
        })
}

async fn concurrent_sessions(headers: &'static [(&'static str, &'static str)]) {
    let clock = ManualClock::at(T0);
    let h = harness_with_origin(CacheConfig::default(), session_origin(&clock, headers), clock);
    let as_user = |session: &str| {
        CacheRequest::get("https://example.com/account").with_header("cookie", &format!("session={}", session))
    };

    let (alice, bob) = tokio::join!(h.cache.handle(as_user("alice")), h.cache.handle(as_user("bob")));
    let (alice, bob) = (alice.unwrap(), bob.unwrap());

    assert_eq!(alice.body, b"account page for session=alice");
    assert_eq!(alice.header("set-cookie"), Some("session=alice; Path=/"));
    assert_eq!(bob.body, b"account page for session=bob");
    assert_eq!(bob.header("set-cookie"), Some("session=bob; Path=/"));
    assert_eq!(h.origin.calls(), 2);
    assert_eq!(h.cache.metrics().snapshot().coalesced, 0);
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_private_responses_are_not_shared() {
    concurrent_sessions(&[("cache-control", "private, max-age=60")]).await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_set_cookie_responses_are_not_shared() {
    concurrent_sessions(&[("cache-control", "max-age=60")]).await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_uncovered_vary_is_not_shared() {
    let clock = ManualClock::at(T0);
    let origin = ScriptedOrigin::new(&clock, vec![])
        .with_delay(Duration::from_millis(100))
        .with_responder(|request, at| {
            let agent = request.header("user-agent").unwrap_or_default();
            OriginResponse::new(StatusCode::OK, format!("page for {}", agent), at)
                .with_header(CACHE_CONTROL, "max-age=60")
                .with_header(VARY, "User-Agent")
        });
    let h = harness_with_origin(CacheConfig::default(), origin, clock);
    let with_agent = |agent: &str| CacheRequest::get("https://example.com/").with_header("user-agent", agent);

    let (mobile, desktop) = tokio::join!(
        h.cache.handle(with_agent("mobile")),
        h.cache.handle(with_agent("desktop"))
    );

    assert_eq!(mobile.unwrap().body, b"page for mobile");
    assert_eq!(desktop.unwrap().body, b"page for desktop");
    assert_eq!(h.origin.calls(), 2);
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_client_conditional_304_is_not_shared() {
    let clock = ManualClock::at(T0);
    let origin = ScriptedOrigin::new(&clock, vec![])
        .with_delay(Duration::from_millis(100))
        .with_responder(|request, at| {
            let status = if request.header("if-none-match") == Some("\"v1\"") {
                StatusCode::NOT_MODIFIED
            } else {
                StatusCode::OK
            };
            let body = if status == StatusCode::OK { "full page" } else { "" };
            OriginResponse::new(status, body, at)
                .with_header(CACHE_CONTROL, "max-age=60")
                .with_header(ETAG, "\"v1\"")
        });
    let h = harness_with_origin(CacheConfig::default(), origin, clock);
    let url = "https://example.com/doc";

    let (conditional, plain) = tokio::join!(
        h.cache.handle(CacheRequest::get(url).with_header("if-none-match", "\"v1\"")),
        h.cache.handle(CacheRequest::get(url))
    );
    let (conditional, plain) = (conditional.unwrap(), plain.unwrap());

    assert_eq!(conditional.status, StatusCode::NOT_MODIFIED);
    assert_eq!(plain.status, StatusCode::OK);
    assert_eq!(plain.body, b"full page");
    assert_eq!(h.origin.calls(), 2);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_revalidation_shares_refreshed_entry() {
    let clock = ManualClock::at(T0);
    let origin = ScriptedOrigin::new(
        &clock,
        vec![
            ok(vec![("cache-control", "max-age=10"), ("etag", "\"v1\"")], "page"),
            Reply::Status(StatusCode::NOT_MODIFIED, vec![], ""),
        ],
    )
    .with_delay(Duration::from_millis(100));
    let h = harness_with_origin(CacheConfig::default(), origin, clock);
    let url = "https://example.com/a";

    h.cache.handle(CacheRequest::get(url)).await.unwrap();
    h.clock.advance(Duration::from_secs(11));

    let (a, b) = tokio::join!(h.cache.handle(CacheRequest::get(url)), h.cache.handle(CacheRequest::get(url)));
    assert_eq!(status(&a.unwrap()), Some("REVALIDATED"));
    assert_eq!(b.unwrap().body, b"page");
    assert_eq!(h.origin.calls(), 2);
    assert_eq!(h.cache.metrics().snapshot().coalesced, 1);
}

#[tokio::test]
async fn test_not_modified_adding_no_cache_evicts_entry() {
    let h = harness(
        CacheConfig::default(),
        vec![
            ok(vec![("cache-control", "max-age=10"), ("etag", "\"v1\"")], "page"),
            Reply::Status(StatusCode::NOT_MODIFIED, vec![("cache-control", "no-cache")], ""),
            ok(vec![("cache-control", "no-cache"), ("etag", "\"v1\"")], "page"),
        ],
    );
    let url = "https://example.com/a";

    h.cache.handle(CacheRequest::get(url)).await.unwrap();
    h.clock.advance(Duration::from_secs(20));
    let revalidated = h.cache.handle(CacheRequest::get(url)).await.unwrap();
    assert_eq!(status(&revalidated), Some("REVALIDATED"));
    assert!(h.store.is_empty());

    h.clock.advance(Duration::from_secs(1));
    let next = h.cache.handle(CacheRequest::get(url)).await.unwrap();
    assert_eq!(status(&next), Some("MISS"));
    assert_eq!(h.origin.calls(), 3);
}

#[tokio::test]
async fn test_invalid_url_bypasses_cache() {
    let h = harness(CacheConfig::default(), vec![ok(vec![], "raw")]);

    let response = h.cache.handle(CacheRequest::get("not a url")).await.unwrap();
    assert_eq!(status(&response), Some("BYPASS"));
    assert_eq!(response.body, b"raw");
    assert_eq!(h.origin.calls(), 1);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_uncacheable_method_bypasses() {
    let h = harness(
        CacheConfig::default(),
        vec![ok(vec![("cache-control", "max-age=60")], "created")],
    );

    let response = h
        .cache
        .handle(CacheRequest::new(Method::POST, "https://example.com/orders").with_body("{}"))
        .await
        .unwrap();
    assert_eq!(status(&response), Some("BYPASS"));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_store_failure_degrades_to_origin() {
    let clock = ManualClock::at(T0);
    let origin = Arc::new(ScriptedOrigin::new(
        &clock,
        vec![
            ok(vec![("cache-control", "max-age=60")], "a"),
            ok(vec![("cache-control", "max-age=60")], "b"),
        ],
    ));
    let cache = EdgeCache::new(&CacheConfig::default(), BrokenStore, origin.clone())
        .with_clock(Arc::new(clock));

    let first = cache.handle(CacheRequest::get("https://example.com/")).await.unwrap();
    let second = cache.handle(CacheRequest::get("https://example.com/")).await.unwrap();

    assert_eq!(status(&first), Some("MISS"));
    assert_eq!(second.body, b"b");
    assert_eq!(origin.calls(), 2);

    let snap = cache.metrics().snapshot();
    assert_eq!(snap.store_read_errors, 2);
    assert_eq!(snap.store_write_errors, 2);
}

#[tokio::test]
async fn test_origin_failure_surfaces() {
    let h = harness(
        CacheConfig::default(),
        vec![Reply::Fail(FetchError::Timeout("10s".into()))],
    );

    let result = h.cache.handle(CacheRequest::get("https://example.com/")).await;
    assert!(matches!(result, Err(CacheError::OriginUnavailable(_))));
    assert_eq!(h.cache.metrics().snapshot().origin_failures, 1);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_vary_outside_key_is_not_stored() {
    let h = harness(
        CacheConfig::default(),
        vec![ok(vec![("cache-control", "max-age=60"), ("vary", "User-Agent")], "ua")],
    );

    h.cache.handle(CacheRequest::get("https://example.com/")).await.unwrap();
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_vary_header_splits_entries() {
    let config = CacheConfig {
        vary_headers: vec!["accept-language".into()],
        ..Default::default()
    };
    let h = harness(
        config,
        vec![
            ok(vec![("cache-control", "max-age=60"), ("vary", "Accept-Language")], "en"),
            ok(vec![("cache-control", "max-age=60"), ("vary", "Accept-Language")], "fr"),
        ],
    );
    let request = |lang: &str| CacheRequest::get("https://example.com/").with_header("accept-language", lang);

    assert_eq!(h.cache.handle(request("en")).await.unwrap().body, b"en");
    assert_eq!(h.cache.handle(request("fr")).await.unwrap().body, b"fr");
    assert_eq!(h.cache.handle(request("en")).await.unwrap().body, b"en");
    assert_eq!(h.origin.calls(), 2);
    assert_eq!(h.store.len(), 2);
}

#[tokio::test]
async fn test_debug_headers_on_request() {
    let h = harness(
        CacheConfig::default(),
        vec![ok(vec![("cache-control", "max-age=60")], "x")],
    );

    let plain = h.cache.handle(CacheRequest::get("https://example.com/")).await.unwrap();
    assert!(plain.header("x-cache-key").is_none());

    let debug = h
        .cache
        .handle(CacheRequest::get("https://example.com/").with_header("x-debug-cache", "1"))
        .await
        .unwrap();
    assert!(debug.header("x-cache-key").unwrap().starts_with("v1:"));
    assert_eq!(debug.header("x-cache-ttl"), Some("60"));
}
