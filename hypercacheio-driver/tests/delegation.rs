//! Secondary and HA delegation against a recording mock peer.

use std::time::Duration;

use hypercacheio_core::{NodeConfig, NodeRole};
use hypercacheio_driver::CacheStore;
use hypercacheio_test_utils::{manual_clock, secondary_config, MockPeer, TEST_EPOCH, TEST_TOKEN};
use reqwest::{Method, StatusCode};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(2);

fn secondary(peer: &MockPeer, async_requests: bool) -> CacheStore {
    let config = secondary_config(peer.url("/api"), async_requests);
    CacheStore::from_config(&config, manual_clock()).expect("store should build")
}

#[tokio::test]
async fn sync_put_issues_exactly_one_post() {
    let peer = MockPeer::start().await;
    let store = secondary(&peer, false);

    assert!(store.put("x", json!("1"), Some(60)).await.expect("put"));

    let requests = peer.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.path, "/api/cache/x");
    assert_eq!(request.body, Some(json!({"value": "1", "ttl": 60})));
    assert_eq!(request.token.as_deref(), Some(TEST_TOKEN));
    assert_eq!(request.server_id.as_deref(), Some("secondary-test"));
}

#[tokio::test]
async fn put_then_get_is_served_from_l1() {
    let peer = MockPeer::start().await;
    let store = secondary(&peer, false);

    store.put("x", json!({"a": 1}), Some(60)).await.expect("put");
    assert_eq!(store.get("x").await.expect("get"), Some(json!({"a": 1})));
    assert_eq!(peer.requests().len(), 1, "get must not hit the peer");
}

#[tokio::test]
async fn get_is_synchronous_even_in_async_mode() {
    let peer = MockPeer::start().await;
    peer.respond(Method::GET, "/api/cache/greeting", json!({"data": "hello"}));
    let store = secondary(&peer, true);

    assert_eq!(store.get("greeting").await.expect("get"), Some(json!("hello")));
    assert_eq!(store.get("greeting").await.expect("get"), Some(json!("hello")));
    assert_eq!(peer.requests().len(), 1, "second read comes from L1");

    assert_eq!(store.get("nothing").await.expect("get"), None);
}

#[tokio::test]
async fn remote_expiration_bounds_the_l1_copy() {
    let peer = MockPeer::start().await;
    peer.respond(
        Method::GET,
        "/api/cache/token",
        json!({"data": "abc", "expiration": TEST_EPOCH + 5}),
    );
    let clock = manual_clock();
    let config = secondary_config(peer.url("/api"), false);
    let store = CacheStore::from_config(&config, clock.clone()).expect("store should build");

    assert_eq!(store.get("token").await.expect("get"), Some(json!("abc")));
    assert_eq!(store.get("token").await.expect("get"), Some(json!("abc")));
    assert_eq!(peer.requests().len(), 1);

    clock.advance(6);
    assert_eq!(store.get("token").await.expect("get"), None, "peer copy is stale too");
    assert_eq!(peer.requests().len(), 2);
}

#[tokio::test]
async fn add_and_lock_operations_read_peer_outcome() {
    let peer = MockPeer::start().await;
    peer.respond(Method::POST, "/api/add/k", json!({"added": true}));
    peer.respond(Method::POST, "/api/lock/job", json!({"acquired": true}));
    peer.respond(Method::DELETE, "/api/lock/job", json!({"released": false}));
    peer.respond(Method::GET, "/api/lock/job", json!({"owner": "w1"}));
    let store = secondary(&peer, true);

    assert!(store.add("k", json!(5), Some(30)).await.expect("add"));
    assert!(store.acquire_lock("job", "w1", 10).await.expect("acquire"));
    assert!(!store.release_lock("job", "w2").await.expect("release"));
    assert_eq!(store.lock_owner("job").await.expect("owner"), "w1");

    let requests = peer.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0].body, Some(json!({"value": 5, "ttl": 30})));
    assert_eq!(requests[1].body, Some(json!({"owner": "w1", "ttl": 10})));
    assert_eq!(requests[2].body, Some(json!({"owner": "w2"})));

    // A successful add is readable locally without another round trip.
    assert_eq!(store.get("k").await.expect("get"), Some(json!(5)));
    assert_eq!(peer.requests().len(), 4);
}

#[tokio::test]
async fn async_writes_are_drained_on_shutdown() {
    let peer = MockPeer::start().await;
    peer.set_delay(Duration::from_millis(100));
    let store = secondary(&peer, true);

    store.put("a", json!(1), None).await.expect("put");
    store.forget("b").await.expect("forget");
    store.flush().await.expect("flush");

    assert_eq!(store.shutdown().await, 3);

    let mut seen: Vec<(Method, String)> = peer
        .wait_for_requests(3, WAIT)
        .await
        .into_iter()
        .map(|r| (r.method, r.path))
        .collect();
    seen.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(
        seen,
        vec![
            (Method::DELETE, "/api/cache".to_string()),
            (Method::POST, "/api/cache/a".to_string()),
            (Method::DELETE, "/api/cache/b".to_string()),
        ]
    );
}

#[tokio::test]
async fn unreachable_peer_reads_miss_and_writes_succeed() {
    let peer = MockPeer::start().await;
    let url = peer.url("/api");
    drop(peer);

    let config = NodeConfig {
        timeout: 0.2,
        ..secondary_config(url, false)
    };
    let store = CacheStore::from_config(&config, manual_clock()).expect("store should build");

    assert_eq!(store.get("x").await.expect("get"), None);
    assert!(store.put("x", json!(1), None).await.expect("put"));
    assert!(store.forget("x").await.expect("forget"));
    assert!(!store.add("y", json!(1), None).await.expect("add"));
    assert!(!store.acquire_lock("job", "w1", 10).await.expect("acquire"));
    assert_eq!(store.lock_owner("job").await.expect("owner"), "");
}

#[tokio::test]
async fn error_status_and_timeout_read_as_miss() {
    let peer = MockPeer::start().await;
    peer.respond_with_status(
        Method::GET,
        "/api/cache/broken",
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"data": "ignored"}),
    );
    let store = secondary(&peer, false);
    assert_eq!(store.get("broken").await.expect("get"), None);

    let slow = MockPeer::start().await;
    slow.respond(Method::GET, "/api/cache/slow", json!({"data": "late"}));
    slow.set_delay(Duration::from_millis(800));
    let config = NodeConfig {
        timeout: 0.2,
        ..secondary_config(slow.url("/api"), false)
    };
    let store = CacheStore::from_config(&config, manual_clock()).expect("store should build");
    assert_eq!(store.get("slow").await.expect("get"), None);
}

#[tokio::test]
async fn ha_mode_routes_to_local_sidecar_not_primary() {
    let sidecar = MockPeer::start().await;
    let primary = MockPeer::start().await;

    let mut config = NodeConfig {
        role: NodeRole::Primary,
        primary_url: primary.url("/api/hypercacheio"),
        ha_mode: true,
        async_requests: false,
        api_token: TEST_TOKEN.to_string(),
        ..NodeConfig::default()
    };
    config.go_server.port = sidecar.addr().port();

    let store = CacheStore::from_config(&config, manual_clock()).expect("store should build");
    assert!(!store.executor().is_local());

    store.put("k", json!("v"), None).await.expect("put");
    store.get("other").await.expect("get");
    store.acquire_lock("job", "w1", 5).await.expect("acquire");

    let paths: Vec<String> = sidecar.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(
        paths,
        vec![
            "/api/hypercacheio/cache/k".to_string(),
            "/api/hypercacheio/cache/other".to_string(),
            "/api/hypercacheio/lock/job".to_string(),
        ]
    );
    assert!(primary.requests().is_empty());
}

#[tokio::test]
async fn keys_are_percent_encoded_as_one_segment() {
    let peer = MockPeer::start().await;
    let mut store = secondary(&peer, false);
    store.set_prefix("app:");

    store.put("users/42", json!(true), None).await.expect("put");
    assert_eq!(peer.requests()[0].path, "/api/cache/app:users%2F42");
}

#[tokio::test]
async fn secondary_sweep_and_stats_are_noops() {
    let peer = MockPeer::start().await;
    let store = secondary(&peer, false);

    assert_eq!(store.sweep().await.expect("sweep").entries, 0);
    assert!(store.stats().await.expect("stats").is_none());
    assert!(peer.requests().is_empty());
}
