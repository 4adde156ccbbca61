use super::*;
use crate::error::{FolioError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize};

const TTL: Duration = Duration::from_secs(300);

/// In-memory source with a switchable failure mode and optional latency.
struct MockSource {
    calls: AtomicUsize,
    healthy: AtomicBool,
    payload: Mutex<Value>,
    delay: Duration,
}

impl MockSource {
    fn new(payload: Value) -> Arc<Self> {
        Self::with_delay(payload, Duration::ZERO)
    }

    fn with_delay(payload: Value, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            payload: Mutex::new(payload),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn set_payload(&self, payload: Value) {
        *self.payload.lock().unwrap() = payload;
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn query(&self, _query: &str, _params: &QueryParams) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let healthy = self.healthy.load(Ordering::SeqCst);
        let payload = self.payload.lock().unwrap().clone();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if healthy {
            Ok(payload)
        } else {
            Err(FolioError::Transport("connection reset by peer".into()))
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn cache_for(source: &Arc<MockSource>) -> ContentCache<Arc<MockSource>> {
    let _ = env_logger::builder().is_test(true).try_init();
    ContentCache::new(source.clone(), CacheConfig::new().with_ttl(TTL))
}

const ARTICLES: &str = "*[_type=='article']";
const PODCASTS: &str = "*[_type=='podcast']";

fn params(pairs: &[(&str, Value)]) -> QueryParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ── Freshness ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_fresh_entry_skips_source() {
    let source = MockSource::new(json!([{ "title": "A" }]));
    let cache = cache_for(&source);

    let first = cache.fetch(ARTICLES, None).await;
    tokio::time::advance(Duration::from_secs(60)).await;
    let second = cache.fetch(ARTICLES, None).await;

    assert_eq!(source.calls(), 1);
    let (Fetched::Fresh(a), Fetched::Fresh(b)) = (first, second) else {
        panic!("both lookups should be fresh");
    };
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_refetches_once() {
    let source = MockSource::new(json!([{ "title": "A" }]));
    let cache = cache_for(&source);

    cache.fetch(ARTICLES, None).await;
    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    let refreshed = cache.fetch(ARTICLES, None).await;

    assert_eq!(source.calls(), 2);
    assert!(refreshed.is_fresh());

    // The refresh reset the window.
    cache.fetch(ARTICLES, None).await;
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_entry_is_stale_at_exactly_ttl() {
    let source = MockSource::new(json!([]));
    let cache = cache_for(&source);

    cache.fetch(ARTICLES, None).await;
    tokio::time::advance(TTL - Duration::from_millis(1)).await;
    cache.fetch(ARTICLES, None).await;
    assert_eq!(source.calls(), 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    cache.fetch(ARTICLES, None).await;
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reordered_params_share_entry() {
    let source = MockSource::new(json!({ "title": "Le débat" }));
    let cache = cache_for(&source);
    let query = "*[_type==$type && slug.current==$slug][0]";

    let mut a = serde_json::Map::new();
    a.insert("slug".into(), json!("le-debat"));
    a.insert("lang".into(), json!("fr"));
    let mut b = serde_json::Map::new();
    b.insert("lang".into(), json!("fr"));
    b.insert("slug".into(), json!("le-debat"));

    let first = params(&[("type", json!("debate")), ("filter", Value::Object(a))]);
    let second = params(&[("filter", Value::Object(b)), ("type", json!("debate"))]);

    cache.fetch(query, Some(&first)).await;
    let hit = cache.fetch(query, Some(&second)).await;

    assert_eq!(source.calls(), 1);
    assert!(hit.is_fresh());
}

// ── Failure handling ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_serves_stale_data() {
    let source = MockSource::new(json!([{ "title": "A" }]));
    let cache = cache_for(&source);

    cache.fetch(ARTICLES, None).await;
    tokio::time::advance(TTL * 2).await;
    source.set_healthy(false);

    let result = cache.fetch(ARTICLES, None).await;
    assert_eq!(source.calls(), 2);
    assert_eq!(result, Fetched::Stale(Arc::new(json!([{ "title": "A" }]))));

    // A failed refresh doesn't extend freshness; the next lookup tries again.
    let again = cache.fetch(ARTICLES, None).await;
    assert_eq!(source.calls(), 3);
    assert!(again.is_stale());
}

#[tokio::test(start_paused = true)]
async fn test_cold_failure_is_unavailable() {
    let source = MockSource::new(json!([]));
    source.set_healthy(false);
    let cache = cache_for(&source);

    let result = cache.fetch(ARTICLES, None).await;
    assert!(result.is_unavailable());
    assert_eq!(result.status(), FetchStatus::Unavailable);
    assert_eq!(cache.get(ARTICLES, None).await, None);
    assert_eq!(source.calls(), 2);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_not_retried() {
    let source = MockSource::new(json!([]));
    source.set_healthy(false);
    let cache = cache_for(&source);

    cache.fetch(ARTICLES, None).await;
    assert_eq!(source.calls(), 1);
}

// ── Invalidation ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_invalidate_all_forces_refetch() {
    let source = MockSource::new(json!([]));
    let cache = cache_for(&source);

    cache.fetch(ARTICLES, None).await;
    cache.fetch(PODCASTS, None).await;
    assert_eq!(cache.len(), 2);

    assert_eq!(cache.invalidate_all(), 2);
    assert!(cache.is_empty());

    cache.fetch(ARTICLES, None).await;
    cache.fetch(PODCASTS, None).await;
    assert_eq!(source.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_matching_keeps_other_entries() {
    let source = MockSource::new(json!([]));
    let cache = cache_for(&source);

    cache.fetch(ARTICLES, None).await;
    tokio::time::advance(Duration::from_secs(30)).await;
    cache.fetch(PODCASTS, None).await;

    let before: Vec<_> = cache
        .entries()
        .into_iter()
        .filter(|e| e.key.contains("article"))
        .collect();

    tokio::time::advance(Duration::from_secs(30)).await;
    let removed = cache.invalidate_matching("podcast");
    assert_eq!(removed, 1);
    assert_eq!(cache.len(), 1);

    let after = cache.entries();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].key, before[0].key);
    assert_eq!(after[0].fetched_at, before[0].fetched_at);
    assert_eq!(after[0].age, Duration::from_secs(60));

    // The surviving entry is still served without a call.
    cache.fetch(ARTICLES, None).await;
    assert_eq!(source.calls(), 2);

    cache.fetch(PODCASTS, None).await;
    assert_eq!(source.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_matching_searches_params_too() {
    let source = MockSource::new(json!([]));
    let cache = cache_for(&source);
    let by_type = "*[_type==$type]";

    cache
        .fetch(by_type, Some(&params(&[("type", json!("emission"))])))
        .await;
    cache
        .fetch(by_type, Some(&params(&[("type", json!("coaching"))])))
        .await;

    assert_eq!(cache.invalidate_matching("\"emission\""), 1);
    assert_eq!(cache.invalidate_matching("nothing-matches"), 0);
    assert_eq!(cache.len(), 1);
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_call() {
    let source = MockSource::with_delay(json!([{ "title": "A" }]), Duration::from_millis(100));
    let cache = cache_for(&source);

    let (a, b, c) = tokio::join!(
        cache.fetch(ARTICLES, None),
        cache.fetch(ARTICLES, None),
        cache.fetch(ARTICLES, None),
    );

    assert_eq!(source.calls(), 1);
    assert!(a.is_fresh() && b.is_fresh() && c.is_fresh());

    let stats = cache.stats();
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.coalesced, 2);
    assert_eq!(stats.source_calls, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_without_dedupe_call_separately() {
    let source = MockSource::with_delay(json!([]), Duration::from_millis(100));
    let cache = ContentCache::new(
        source.clone(),
        CacheConfig::new().with_ttl(TTL).with_dedupe_in_flight(false),
    );

    let (a, b) = tokio::join!(cache.fetch(ARTICLES, None), cache.fetch(ARTICLES, None));

    assert_eq!(source.calls(), 2);
    assert!(a.is_fresh() && b.is_fresh());
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shared_failure_falls_back_per_caller() {
    let source = MockSource::with_delay(json!([{ "title": "A" }]), Duration::from_millis(100));
    let cache = cache_for(&source);

    cache.fetch(ARTICLES, None).await;
    tokio::time::advance(TTL).await;
    source.set_healthy(false);

    let (a, b, c) = tokio::join!(
        cache.fetch(ARTICLES, None),
        cache.fetch(ARTICLES, None),
        cache.fetch(PODCASTS, None),
    );

    // One shared refresh for the articles, one call for the podcasts.
    assert_eq!(source.calls(), 3);
    assert!(a.is_stale());
    assert!(b.is_stale());
    assert!(c.is_unavailable());
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_detaches_in_flight_fetch() {
    let source = MockSource::with_delay(json!("v1"), Duration::from_millis(100));
    let cache = cache_for(&source);

    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.fetch(ARTICLES, None).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(cache.stats().in_flight, 1);

    cache.invalidate_all();
    assert_eq!(cache.stats().in_flight, 0);

    // The detached call still answers its caller but is not stored.
    let first = pending.await.unwrap();
    assert_eq!(first, Fetched::Fresh(Arc::new(json!("v1"))));
    assert!(cache.is_empty());

    source.set_payload(json!("v2"));
    let second = cache.fetch(ARTICLES, None).await;
    assert_eq!(source.calls(), 2);
    assert_eq!(second, Fetched::Fresh(Arc::new(json!("v2"))));
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_invalidation_keeps_in_flight_result() {
    let source = MockSource::with_delay(json!("v1"), Duration::from_millis(100));
    let cache = cache_for(&source);

    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.fetch(ARTICLES, None).await })
    };
    tokio::task::yield_now().await;

    assert_eq!(cache.invalidate_matching("podcast"), 0);
    assert_eq!(cache.stats().in_flight, 1);

    let first = pending.await.unwrap();
    assert_eq!(first, Fetched::Fresh(Arc::new(json!("v1"))));
    assert_eq!(cache.len(), 1);

    let second = cache.fetch(ARTICLES, None).await;
    assert!(second.is_fresh());
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_matching_invalidation_detaches_call_without_dedupe() {
    let source = MockSource::with_delay(json!("v1"), Duration::from_millis(100));
    let cache = ContentCache::new(
        source.clone(),
        CacheConfig::new().with_ttl(TTL).with_dedupe_in_flight(false),
    );

    let (articles, podcasts) = {
        let a = cache.clone();
        let p = cache.clone();
        (
            tokio::spawn(async move { a.fetch(ARTICLES, None).await }),
            tokio::spawn(async move { p.fetch(PODCASTS, None).await }),
        )
    };
    tokio::task::yield_now().await;

    cache.invalidate_matching("article");

    assert!(articles.await.unwrap().is_fresh());
    assert!(podcasts.await.unwrap().is_fresh());
    let keys: Vec<_> = cache.entries().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec![format!("{}::{{}}", PODCASTS)]);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_fetch_completes_on_its_own() {
    let source = MockSource::with_delay(json!("v1"), Duration::from_millis(100));
    let cache = cache_for(&source);

    let abandoned =
        tokio::time::timeout(Duration::from_millis(10), cache.fetch(ARTICLES, None)).await;
    assert!(abandoned.is_err());

    // The call keeps running without a caller and stores its result.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cache.stats().in_flight, 0);
    assert_eq!(cache.len(), 1);
    assert_eq!(source.calls(), 1);

    // Much later, a miss reaches the source again.
    tokio::time::advance(Duration::from_secs(3600)).await;
    source.set_payload(json!("v2"));
    let later = cache.fetch(ARTICLES, None).await;
    assert_eq!(later, Fetched::Fresh(Arc::new(json!("v2"))));
    assert_eq!(source.calls(), 2);
}

// ── Seeding, typed access, stats ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_seeded_entries_are_fresh() {
    let source = MockSource::new(json!("from source"));
    let cache = ContentCache::with_entries(
        source.clone(),
        CacheConfig::new().with_ttl(TTL),
        vec![(CacheKey::new(ARTICLES, None), json!("seeded"))],
    );
    cache.prime(PODCASTS, None, json!("primed"));

    assert_eq!(
        cache.fetch(ARTICLES, None).await,
        Fetched::Fresh(Arc::new(json!("seeded")))
    );
    assert_eq!(
        cache.fetch(PODCASTS, None).await,
        Fetched::Fresh(Arc::new(json!("primed")))
    );
    assert_eq!(source.calls(), 0);

    tokio::time::advance(TTL).await;
    assert_eq!(
        cache.fetch(ARTICLES, None).await,
        Fetched::Fresh(Arc::new(json!("from source")))
    );
    assert_eq!(source.calls(), 1);
}

#[derive(Debug, Deserialize, PartialEq)]
struct Article {
    title: String,
}

#[tokio::test(start_paused = true)]
async fn test_fetch_as_decodes_payload() {
    let source = MockSource::new(json!([{ "title": "A" }, { "title": "B" }]));
    let cache = cache_for(&source);

    let articles: Fetched<Vec<Article>> = cache.fetch_as(ARTICLES, None).await;
    assert_eq!(
        articles,
        Fetched::Fresh(vec![
            Article { title: "A".into() },
            Article { title: "B".into() },
        ])
    );

    tokio::time::advance(TTL).await;
    source.set_healthy(false);
    let stale: Fetched<Vec<Article>> = cache.fetch_as(ARTICLES, None).await;
    assert!(stale.is_stale());
    assert_eq!(stale.data().map(Vec::len), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_as_wrong_shape_is_unavailable() {
    let source = MockSource::new(json!({ "not": "a list" }));
    let cache = cache_for(&source);

    let articles: Fetched<Vec<Article>> = cache.fetch_as(ARTICLES, None).await;
    assert!(articles.is_unavailable());
}

#[tokio::test(start_paused = true)]
async fn test_stats_track_outcomes() {
    let source = MockSource::new(json!([]));
    let cache = cache_for(&source);

    cache.fetch(ARTICLES, None).await;
    cache.fetch(ARTICLES, None).await;
    tokio::time::advance(Duration::from_secs(10)).await;
    cache.fetch(PODCASTS, None).await;
    tokio::time::advance(TTL - Duration::from_secs(5)).await;

    let stats = cache.stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.fresh_entries, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.source_calls, 2);
    assert_eq!(stats.oldest_entry_age, Some(TTL + Duration::from_secs(5)));
    assert_eq!(stats.newest_entry_age, Some(TTL - Duration::from_secs(5)));

    source.set_healthy(false);
    cache.fetch(ARTICLES, None).await;
    cache.fetch("*[_type=='coach']", None).await;
    cache.invalidate_all();

    let stats = cache.stats();
    assert_eq!(stats.stale_served, 1);
    assert_eq!(stats.unavailable, 1);
    assert_eq!(stats.invalidated, 2);
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.oldest_entry_age, None);
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_article_timeline() {
    let source = MockSource::new(json!([{ "title": "A" }]));
    let cache = cache_for(&source);
    let empty = QueryParams::new();

    // t=0
    let r = cache.fetch(ARTICLES, Some(&empty)).await;
    assert_eq!(r, Fetched::Fresh(Arc::new(json!([{ "title": "A" }]))));
    assert_eq!(source.calls(), 1);

    // t=60s
    tokio::time::advance(Duration::from_secs(60)).await;
    let r = cache.fetch(ARTICLES, Some(&empty)).await;
    assert_eq!(r.data().map(|d| (**d).clone()), Some(json!([{ "title": "A" }])));
    assert_eq!(source.calls(), 1);

    // t=301s, source down
    tokio::time::advance(Duration::from_secs(241)).await;
    source.set_healthy(false);
    let r = cache.fetch(ARTICLES, Some(&empty)).await;
    assert_eq!(r, Fetched::Stale(Arc::new(json!([{ "title": "A" }]))));
    assert_eq!(source.calls(), 2);

    // t=302s, after invalidation, source back with new content
    cache.invalidate_all();
    tokio::time::advance(Duration::from_secs(1)).await;
    source.set_healthy(true);
    source.set_payload(json!([{ "title": "B" }]));
    let r = cache.fetch(ARTICLES, Some(&empty)).await;
    assert_eq!(r, Fetched::Fresh(Arc::new(json!([{ "title": "B" }]))));
    assert_eq!(source.calls(), 3);
}
