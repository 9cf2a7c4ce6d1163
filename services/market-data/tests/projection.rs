//! Projection pipeline tests: matching events through the log into the
//! depth book, snapshot stores, and a subscribed client.

use std::sync::Arc;
use std::time::Duration;

use market_data::{
    BlobDepthStore, Client, DepthCache, DepthStream, DepthSnapshotStore, PushMessage,
    StreamConfig, Subscription,
};
use matching_engine::{LogStore, MemoryEventLog, OrderBook};
use persistence::MemoryBlobStore;
use rust_decimal::Decimal;
use types::{Order, Product, Side};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn limit(id: u64, side: Side, price: &str, size: &str) -> Order {
    Order::limit(id, "BTC-USDT", side, dec(price), dec(size))
}

fn fast_config() -> StreamConfig {
    StreamConfig {
        level2_snapshot_interval: 0,
        full_snapshot_interval: 0,
        idle_refresh: Duration::from_millis(20),
        ..StreamConfig::default()
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_depth_follows_matching_events() {
    init_tracing();
    let mut book = OrderBook::new(Product::new("BTC-USDT", 4, 2));
    let event_log = MemoryEventLog::new();

    // Buy 2 rests; sell 1 crosses it: open, match, done(taker).
    let mut logs = book.apply(&limit(1, Side::Buy, "100", "2"));
    logs.extend(book.apply(&limit(2, Side::Sell, "100", "1")));
    event_log.store(&logs).await.unwrap();

    let sub = Arc::new(Subscription::new());
    let cache = Arc::new(DepthCache::new());
    let depth_store = Arc::new(BlobDepthStore::new(Arc::new(MemoryBlobStore::new())));

    let stream = DepthStream::new(
        "BTC-USDT",
        Box::new(event_log.reader()),
        sub.clone(),
        depth_store.clone(),
        cache.clone(),
        fast_config(),
    )
    .unwrap();
    let tasks = stream.start();

    // Two changes: the open and the maker shrinking. The done for the
    // fully-consumed taker is skipped by design.
    wait_for("depth snapshot at seq 2", || {
        cache.get("BTC-USDT").is_some_and(|s| s.seq == 2)
    })
    .await;

    let snapshot = cache.get("BTC-USDT").unwrap();
    assert_eq!(
        snapshot.bids,
        vec![("100".to_string(), "1".to_string(), 1)]
    );
    assert!(snapshot.asks.is_empty());

    for task in tasks {
        task.abort();
    }
}

#[tokio::test]
async fn test_subscriber_sees_snapshot_then_updates() {
    init_tracing();
    let mut book = OrderBook::new(Product::new("BTC-USDT", 4, 2));
    let event_log = MemoryEventLog::new();
    event_log
        .store(&book.apply(&limit(1, Side::Buy, "100", "2")))
        .await
        .unwrap();

    let sub = Arc::new(Subscription::new());
    let cache = Arc::new(DepthCache::new());
    let depth_store = Arc::new(BlobDepthStore::new(Arc::new(MemoryBlobStore::new())));

    let stream = DepthStream::new(
        "BTC-USDT",
        Box::new(event_log.reader()),
        sub.clone(),
        depth_store,
        cache.clone(),
        fast_config(),
    )
    .unwrap();
    let _stream_tasks = stream.start();

    wait_for("initial snapshot", || cache.get("BTC-USDT").is_some()).await;

    let (client, mut write_rx, _client_tasks) = Client::new(1, sub.clone(), cache.clone());
    client.subscribe_level2("BTC-USDT");

    let first = tokio::time::timeout(Duration::from_secs(1), write_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, PushMessage::Snapshot { .. }));

    // New matching activity flows through as an incremental update.
    event_log
        .store(&book.apply(&limit(2, Side::Buy, "99", "1")))
        .await
        .unwrap();

    let second = tokio::time::timeout(Duration::from_secs(1), write_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match second {
        PushMessage::L2update { changes, .. } => {
            assert_eq!(changes, vec![("buy".to_string(), "99".to_string(), "1".to_string())]);
        }
        other => panic!("expected l2update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_projector_restores_from_full_snapshot() {
    init_tracing();
    let mut book = OrderBook::new(Product::new("BTC-USDT", 4, 2));
    let event_log = MemoryEventLog::new();

    let mut logs = book.apply(&limit(1, Side::Buy, "100", "2"));
    logs.extend(book.apply(&limit(2, Side::Sell, "100", "1")));
    event_log.store(&logs).await.unwrap();

    let sub = Arc::new(Subscription::new());
    let cache = Arc::new(DepthCache::new());
    let depth_store = Arc::new(BlobDepthStore::new(Arc::new(MemoryBlobStore::new())));

    let stream = DepthStream::new(
        "BTC-USDT",
        Box::new(event_log.reader()),
        sub.clone(),
        depth_store.clone(),
        cache.clone(),
        fast_config(),
    )
    .unwrap();
    let tasks = stream.start();

    // Wait for a full snapshot covering both applied changes.
    wait_for("full snapshot at seq 2", || {
        depth_store
            .get_last_full("BTC-USDT")
            .unwrap()
            .is_some_and(|s| s.seq == 2)
    })
    .await;
    for task in tasks {
        task.abort();
    }

    // More activity lands in the log while the projector is down.
    event_log
        .store(&book.cancel(&Order::cancellation(1, "BTC-USDT", Side::Buy)))
        .await
        .unwrap();

    // Restart: restore, resume past the snapshot, apply only the tail.
    let cache = Arc::new(DepthCache::new());
    let stream = DepthStream::new(
        "BTC-USDT",
        Box::new(event_log.reader()),
        sub,
        depth_store,
        cache.clone(),
        fast_config(),
    )
    .unwrap();
    let _tasks = stream.start();

    wait_for("cancel applied after restore", || {
        cache.get("BTC-USDT").is_some_and(|s| s.seq == 3)
    })
    .await;

    let snapshot = cache.get("BTC-USDT").unwrap();
    assert!(snapshot.bids.is_empty(), "book should be empty after cancel");
    assert!(snapshot.asks.is_empty());
}
