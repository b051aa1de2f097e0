//! End-to-end pipeline scenarios, built on the `test-util` fakes rather
//! than a live HTTP server (transport is already an injected trait here,
//! so a real server buys nothing) — see spec.md §8.

use std::sync::Arc;
use std::time::Duration;

use http_pipeline::testing::{
    AtomicRateLimitStore, DelayedTransport, MemoryCacheStore, MemoryDedupStore,
    MemoryRateLimitStore, ScriptedTransport,
};
use http_pipeline::{
    CacheStore, Client, ClientOptions, Priority, RateLimitStore, RequestOptions, ResponseValue,
};
use url::Url;

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn text(s: &str) -> ResponseValue {
    ResponseValue::Text(s.to_string())
}

#[tokio::test]
async fn fresh_cache_hit_makes_no_second_transport_call() {
    let transport = Arc::new(ScriptedTransport::new().with_json_response(
        200,
        &[("cache-control", "max-age=3600")],
        "first",
    ));
    let mut client = Client::new(transport.clone(), ClientOptions::default());
    client.cache = Some(Arc::new(MemoryCacheStore::new()));

    let target = url("https://api.example.com/x");
    let first = client.get(&target, RequestOptions::default()).await.unwrap();
    assert_eq!(first, text("first"));
    assert_eq!(transport.call_count(), 1);

    let second = client.get(&target, RequestOptions::default()).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(transport.call_count(), 1, "fresh hit must not re-fetch");
}

#[tokio::test]
async fn conditional_revalidation_returns_cached_value_on_304() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_json_response(200, &[("cache-control", "max-age=1"), ("etag", "\"v1\"")], "body")
            .with_json_response(304, &[], ""),
    );
    let mut client = Client::new(transport.clone(), ClientOptions::default());
    client.cache = Some(Arc::new(MemoryCacheStore::new()));

    let target = url("https://api.example.com/x");
    let first = client.get(&target, RequestOptions::default()).await.unwrap();
    assert_eq!(transport.call_count(), 1);

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let second = client.get(&target, RequestOptions::default()).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(transport.call_count(), 2, "stale entry must trigger a conditional request");
}

#[tokio::test]
async fn stale_while_revalidate_serves_stale_value_and_refreshes_in_background() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_json_response(
                200,
                &[("cache-control", "max-age=1, stale-while-revalidate=120"), ("etag", "\"a\"")],
                "first",
            )
            .with_json_response(
                200,
                &[("cache-control", "max-age=1, stale-while-revalidate=120"), ("etag", "\"b\"")],
                "second",
            ),
    );
    let mut client = Client::new(transport.clone(), ClientOptions::default());
    let cache = Arc::new(MemoryCacheStore::new());
    client.cache = Some(cache.clone());

    let target = url("https://api.example.com/x");
    let first = client.get(&target, RequestOptions::default()).await.unwrap();
    assert_eq!(first, text("first"));

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let second = client.get(&target, RequestOptions::default()).await.unwrap();
    assert_eq!(second, first, "SWR must return the stale value synchronously");

    client.drain_background_revalidations().await;
    assert_eq!(transport.call_count(), 2, "the background revalidation must have run");

    let refreshed = cache.get(&http_pipeline::fingerprint(&target)).await.unwrap().unwrap();
    assert_eq!(refreshed.value, text("second"));
    assert_eq!(refreshed.etag.as_deref(), Some("\"b\""));
}

#[tokio::test]
async fn stale_if_error_falls_back_to_cached_value_on_server_error() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_json_response(
                200,
                &[("cache-control", "max-age=1, stale-if-error=300")],
                "cached",
            )
            .with_json_response(500, &[], "boom"),
    );
    let mut client = Client::new(transport.clone(), ClientOptions::default());
    client.cache = Some(Arc::new(MemoryCacheStore::new()));

    let target = url("https://api.example.com/x");
    let first = client.get(&target, RequestOptions::default()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let second = client.get(&target, RequestOptions::default()).await.unwrap();
    assert_eq!(second, first, "a 500 during stale-if-error must fall back to the stale value");
}

#[tokio::test]
async fn dedup_coalesces_concurrent_callers_into_one_transport_call() {
    let transport = Arc::new(DelayedTransport::new(
        ScriptedTransport::new().with_json_response(200, &[], "{\"ok\":true}"),
        Duration::from_millis(50),
    ));
    let mut client = Client::new(transport.clone(), ClientOptions::default());
    client.dedup = Some(Arc::new(MemoryDedupStore::new()));
    let client = Arc::new(client);

    let target = url("https://api.example.com/y?page=1");
    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        let target = target.clone();
        handles.push(tokio::spawn(async move {
            client.get(&target, RequestOptions::default()).await.unwrap()
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let expected = ResponseValue::Json(serde_json::json!({"ok": true}));
    assert!(results.iter().all(|r| *r == expected));
    assert_eq!(transport.inner().call_count(), 1, "exactly one transport call for 8 callers");
}

#[tokio::test]
async fn server_cooldown_is_honored_after_429_with_retry_after() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_json_response(429, &[("retry-after", "1")], "limited")
            .with_json_response(200, &[], "ok"),
    );
    let mut options = ClientOptions::default();
    options.throw_on_rate_limit = true;
    let client = Client::new(transport.clone(), options);

    let target = url("https://api.example.com/x");
    let first = client.get(&target, RequestOptions::default()).await;
    assert!(first.is_err(), "429 is surfaced as an http error on the first call");

    let immediate = client.get(&target, RequestOptions::default()).await;
    assert!(
        matches!(immediate, Err(http_pipeline::PipelineError::RateLimited { .. })),
        "a call immediately after must be refused by the engaged cooldown"
    );

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let after_cooldown = client.get(&target, RequestOptions::default()).await.unwrap();
    assert_eq!(after_cooldown, text("ok"));
}

#[tokio::test]
async fn vary_mismatch_refetches_even_when_the_cached_entry_is_fresh() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_json_response(
                200,
                &[("cache-control", "max-age=3600"), ("vary", "Accept")],
                "json-body",
            )
            .with_json_response(
                200,
                &[("cache-control", "max-age=3600"), ("vary", "Accept")],
                "xml-body",
            ),
    );
    let mut client = Client::new(transport.clone(), ClientOptions::default());
    client.cache = Some(Arc::new(MemoryCacheStore::new()));

    let target = url("https://api.example.com/x");

    let mut first_options = RequestOptions::default();
    first_options.headers.insert("accept".to_string(), "application/json".to_string());
    let first = client.get(&target, first_options).await.unwrap();
    assert_eq!(first, text("json-body"));
    assert_eq!(transport.call_count(), 1);

    let mut second_options = RequestOptions::default();
    second_options.headers.insert("accept".to_string(), "application/xml".to_string());
    let second = client.get(&target, second_options).await.unwrap();
    assert_eq!(second, text("xml-body"));
    assert_eq!(transport.call_count(), 2, "Vary mismatch must force a re-fetch");
}

#[tokio::test]
async fn atomic_rate_limit_store_admission_records_only_once() {
    let transport = Arc::new(ScriptedTransport::new().with_json_response(200, &[], "ok"));
    let mut client = Client::new(transport, ClientOptions::default());
    let rate_limit = Arc::new(AtomicRateLimitStore::new(1));
    client.rate_limit = Some(rate_limit.clone());

    let target = url("https://api.example.com/widgets");
    client.get(&target, RequestOptions::default()).await.unwrap();

    let status = rate_limit.get_status("widgets").await.unwrap();
    assert_eq!(status.remaining, 0, "the admission must not be double-recorded");
}

#[tokio::test]
async fn check_then_record_rate_limit_store_refuses_second_admission() {
    let transport = Arc::new(ScriptedTransport::new().with_json_response(200, &[], "ok"));
    let mut options = ClientOptions::default();
    options.throw_on_rate_limit = true;
    let mut client = Client::new(transport, options);
    client.rate_limit = Some(Arc::new(MemoryRateLimitStore::new(1, Duration::from_secs(60))));

    let target = url("https://api.example.com/widgets");
    client.get(&target, RequestOptions::default()).await.unwrap();

    let second = client.get(&target, RequestOptions::default()).await;
    assert!(matches!(second, Err(http_pipeline::PipelineError::RateLimited { .. })));
}

#[tokio::test]
async fn priority_admission_is_tracked_independently_per_priority() {
    let store = MemoryRateLimitStore::new(1, Duration::from_secs(60));
    assert!(store.can_proceed("widgets", Priority::User).await.unwrap());
    store.record("widgets", Priority::User).await.unwrap();
    assert!(!store.can_proceed("widgets", Priority::User).await.unwrap());
    assert!(store.can_proceed("widgets", Priority::Background).await.unwrap());
}
