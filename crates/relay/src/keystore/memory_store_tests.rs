use futures_util::StreamExt;

use super::*;

#[tokio::test]
async fn set_then_get_round_trips() {
    let kv = InMemoryKv::new();
    kv.set("k", "v", None).await.expect("set");
    assert_eq!(kv.get("k").await.expect("get"), Some("v".to_owned()));
}

#[tokio::test]
async fn set_if_absent_only_succeeds_once() {
    let kv = InMemoryKv::new();
    assert!(kv.set_if_absent("lock:a", "holder-1", 5).await.expect("first"));
    assert!(!kv.set_if_absent("lock:a", "holder-2", 5).await.expect("second"));
}

#[tokio::test]
async fn incr_by_accumulates() {
    let kv = InMemoryKv::new();
    assert_eq!(kv.incr_by("inflight:acc1", 1).await.expect("incr"), 1);
    assert_eq!(kv.incr_by("inflight:acc1", 1).await.expect("incr"), 2);
    assert_eq!(kv.incr_by("inflight:acc1", -1).await.expect("decr"), 1);
}

#[tokio::test]
async fn hash_set_and_get_all() {
    let kv = InMemoryKv::new();
    kv.hash_set("account:a1", &[("state", "active"), ("priority", "1")], None).await.expect("set");
    let fields = kv.hash_get_all("account:a1").await.expect("get");
    assert_eq!(fields.get("state"), Some(&"active".to_owned()));
    assert_eq!(fields.get("priority"), Some(&"1".to_owned()));
}

#[tokio::test]
async fn sorted_set_sums_weight_after_trim() {
    let kv = InMemoryKv::new();
    kv.zadd("rl:key1:tok", "req-1", 100.0, 500.0).await.expect("zadd");
    kv.zadd("rl:key1:tok", "req-2", 110.0, 300.0).await.expect("zadd");
    kv.zadd("rl:key1:tok", "req-3", 1.0, 9999.0).await.expect("zadd stale");

    kv.zremrangebyscore("rl:key1:tok", 0.0, 50.0).await.expect("trim");

    let total = kv.zsum_weight("rl:key1:tok").await.expect("sum");
    assert_eq!(total, 800.0);
}

#[tokio::test]
async fn delete_clears_all_representations() {
    let kv = InMemoryKv::new();
    kv.set("x", "1", None).await.expect("set");
    kv.delete("x").await.expect("delete");
    assert_eq!(kv.get("x").await.expect("get"), None);
}

#[tokio::test]
async fn set_with_ttl_expires() {
    let kv = InMemoryKv::new();
    kv.set("short", "v", Some(0)).await.expect("set");
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(kv.get("short").await.expect("get"), None);
}

#[tokio::test]
async fn scan_prefix_filters_by_prefix() {
    let kv = InMemoryKv::new();
    kv.set("account:a1", "x", None).await.expect("set");
    kv.set("account:a2", "x", None).await.expect("set");
    kv.set("apikey:k1", "x", None).await.expect("set");
    let mut matched = kv.scan_prefix("account:").await.expect("scan");
    matched.sort();
    assert_eq!(matched, vec!["account:a1".to_owned(), "account:a2".to_owned()]);
}

#[tokio::test]
async fn compare_and_swap_only_succeeds_on_matching_expectation() {
    let kv = InMemoryKv::new();
    // absent key: CAS against `None` succeeds, against `Some(..)` fails.
    assert!(!kv.compare_and_swap("cas:a", Some("anything"), "v1", None).await.expect("cas"));
    assert!(kv.compare_and_swap("cas:a", None, "v1", None).await.expect("cas"));
    assert_eq!(kv.get("cas:a").await.expect("get"), Some("v1".to_owned()));

    assert!(!kv.compare_and_swap("cas:a", Some("stale"), "v2", None).await.expect("cas"));
    assert_eq!(kv.get("cas:a").await.expect("get"), Some("v1".to_owned()));

    assert!(kv.compare_and_swap("cas:a", Some("v1"), "v2", None).await.expect("cas"));
    assert_eq!(kv.get("cas:a").await.expect("get"), Some("v2".to_owned()));
}

#[tokio::test]
async fn decr_credit_clamped_floors_at_zero_and_reports_insufficiency() {
    let kv = InMemoryKv::new();
    kv.set("credits:k1", "5", None).await.expect("set");

    let (balance, insufficient) = kv.decr_credit_clamped("credits:k1", 2.0).await.expect("decr");
    assert_eq!(balance, 3.0);
    assert!(!insufficient);

    let (balance, insufficient) = kv.decr_credit_clamped("credits:k1", 10.0).await.expect("decr");
    assert_eq!(balance, 0.0);
    assert!(insufficient);
}

#[tokio::test]
async fn hash_incr_by_accumulates_integer_fields() {
    let kv = InMemoryKv::new();
    assert_eq!(kv.hash_incr_by("usage:daily:k1", "requests", 1, None).await.expect("incr"), 1);
    assert_eq!(kv.hash_incr_by("usage:daily:k1", "requests", 4, None).await.expect("incr"), 5);
}

#[tokio::test]
async fn hash_incr_by_float_accumulates_cost() {
    let kv = InMemoryKv::new();
    let cost = kv.hash_incr_by_float("usage:daily:k1", "cost", 1.5, None).await.expect("incr");
    assert!((cost - 1.5).abs() < 1e-9);
    let cost = kv.hash_incr_by_float("usage:daily:k1", "cost", 0.25, None).await.expect("incr");
    assert!((cost - 1.75).abs() < 1e-9);
}

#[tokio::test]
async fn publish_subscribe_delivers_messages_to_subscriber() {
    let kv = InMemoryKv::new();
    let mut stream = kv.subscribe("events").await.expect("subscribe");
    kv.publish("events", "hello").await.expect("publish");
    let received = stream.next().await;
    assert_eq!(received, Some("hello".to_owned()));
}
