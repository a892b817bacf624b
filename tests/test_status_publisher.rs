//! Status publishing tests
//!
//! Status events are best-effort: they must never fail the caller, never
//! disturb consumption, and never reach the broker when turned off.

mod test_helpers;

use broadcast_relay::testing::wait_until;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use test_helpers::{fast_settings, PumpHarness};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct ConnectionCount {
    server: &'static str,
    connected: u32,
}

#[tokio::test]
async fn test_status_message_published_as_json() {
    let mut harness = PumpHarness::start(fast_settings(), true);
    harness.wait_connected().await;

    harness
        .publisher
        .send_message(
            "websocket.connections",
            &ConnectionCount {
                server: "ws-1",
                connected: 12,
            },
        )
        .await;

    let published = harness.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "status");
    assert_eq!(published[0].routing_key, "websocket.connections");
    assert_eq!(published[0].json(), json!({"server": "ws-1", "connected": 12}));
}

#[tokio::test]
async fn test_disabled_status_messages_never_touch_the_broker() {
    let mut harness = PumpHarness::start(fast_settings(), false);
    harness.wait_connected().await;

    for i in 0..10 {
        harness
            .publisher
            .send_message("websocket.connections", &json!({ "n": i }))
            .await;
    }

    assert_eq!(harness.broker.publish_calls(), 0);
}

#[tokio::test]
async fn test_send_before_first_connect_is_dropped() {
    let broker = broadcast_relay::testing::MockBroker::new();
    broker.fail_next_connects(usize::MAX);
    let harness = PumpHarness::start_with_broker(broker, fast_settings(), true);

    harness.publisher.send_message("key", &json!({"a": 1})).await;

    assert!(!harness.publisher.is_live().await);
    assert_eq!(harness.broker.publish_calls(), 0);
}

#[tokio::test]
async fn test_publish_failure_does_not_disturb_consumption() {
    let mut harness = PumpHarness::start(fast_settings(), true);
    harness.wait_connected().await;

    harness.broker.set_fail_publishes(true);
    harness.publisher.send_message("key", &json!({"a": 1})).await;
    assert_eq!(harness.broker.publish_calls(), 1);
    assert!(harness.broker.published().is_empty());

    harness.broker.deliver("r1", "first");
    harness.broker.deliver("r2", "second");
    harness.broker.deliver("r1", "third");
    let broker = harness.broker.clone();
    assert!(wait_until(|| broker.acked().len() == 3, WAIT).await);

    assert_eq!(
        harness.handler.received(),
        vec![
            ("r1".to_string(), "first".to_string()),
            ("r2".to_string(), "second".to_string()),
            ("r1".to_string(), "third".to_string()),
        ]
    );
    assert_eq!(harness.broker.acked(), harness.broker.delivered());
    assert_eq!(harness.broker.sessions_opened(), 1);

    harness.broker.set_fail_publishes(false);
    harness.publisher.send_message("key", &json!({"a": 2})).await;
    assert_eq!(harness.broker.published().len(), 1);
}

#[tokio::test]
async fn test_publisher_follows_reconnects() {
    let mut harness = PumpHarness::start(fast_settings(), true);
    harness.wait_connected().await;
    assert!(harness.publisher.is_live().await);

    harness.broker.inject_disconnect();
    harness.publisher.send_message("key", &json!({"lost": true})).await;
    assert!(harness.broker.published().is_empty());

    let broker = harness.broker.clone();
    assert!(wait_until(|| broker.sessions_opened() == 2, WAIT).await);
    harness.wait_connected().await;

    harness.publisher.send_message("key", &json!({"back": true})).await;
    let published = harness.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].json(), json!({"back": true}));
}

#[tokio::test]
async fn test_concurrent_senders() {
    let mut harness = PumpHarness::start(fast_settings(), true);
    harness.wait_connected().await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let publisher = harness.publisher.clone();
            tokio::spawn(async move {
                publisher.send_message("fanout", &json!({ "sender": i })).await;
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(harness.broker.published().len(), 8);
}
