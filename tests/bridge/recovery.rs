use super::{events, Sides};
use crate::support::eventually;
use amqp_resilience_bridge::{BridgeEvent, Side};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn restarts_after_source_reconnects() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events());
    bridge.start().await.unwrap();
    let tags = bridge.consumer_tags();

    sides.source_broker.drop_connections();
    assert!(!bridge.is_running());

    eventually("bridge restart", || bridge.is_running()).await;
    assert_eq!(bridge.consumer_tags().len(), 1);
    assert_ne!(bridge.consumer_tags(), tags);
    // The target channel survived and is reused.
    assert_eq!(sides.target_broker.open_channels(), 1);

    sides
        .source_broker
        .publish_external("events", "after.reconnect", "x")
        .unwrap();
    sides.source_broker.dispatch().await;
    assert_eq!(sides.target_broker.published().len(), 1);
}

#[tokio::test]
async fn unacked_message_is_forwarded_after_source_reconnects() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events());
    bridge.start().await.unwrap();

    // Strand a message, then lose the source connection before a restart.
    sides.target_broker.close_all_channels();
    sides
        .source_broker
        .publish_external("events", "k", "in flight")
        .unwrap();
    sides.source_broker.dispatch().await;
    assert_eq!(bridge.stranded(), 1);

    sides.source_broker.drop_connections();
    assert_eq!(bridge.stranded(), 0);
    assert_eq!(sides.source_broker.queue_depth("bridge_events"), 1);

    eventually("bridge restart", || bridge.is_running()).await;
    sides.source_broker.dispatch().await;

    let published = sides.target_broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].body, b"in flight");
}

#[tokio::test]
async fn restarts_after_target_reconnects() {
    let sides = Sides::connect().await;
    let started = Arc::new(AtomicUsize::new(0));
    let started_clone = Arc::clone(&started);
    let closed = Arc::new(Mutex::new(Vec::new()));
    let closed_clone = Arc::clone(&closed);
    let bridge = sides.bridge(
        events()
            .on_start(move || {
                started_clone.fetch_add(1, Ordering::SeqCst);
            })
            .on_event(move |event| {
                if let BridgeEvent::ChannelClosed { side, .. } = event {
                    closed_clone.lock().unwrap().push(*side);
                }
            }),
    );
    bridge.start().await.unwrap();
    let tags = bridge.consumer_tags();

    sides.target_broker.drop_connections();
    assert_eq!(*closed.lock().unwrap(), vec![Side::Target]);

    eventually("bridge restart", || started.load(Ordering::SeqCst) == 2).await;
    assert!(bridge.is_running());
    // The source consumers were never interrupted.
    assert_eq!(bridge.consumer_tags(), tags);
    assert!(sides.source_broker.cancelled().is_empty());

    sides
        .source_broker
        .publish_external("events", "k", "x")
        .unwrap();
    sides.source_broker.dispatch().await;
    assert_eq!(sides.target_broker.published().len(), 1);
}

#[tokio::test]
async fn restart_waits_for_both_sides() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events());
    bridge.start().await.unwrap();

    sides.target_broker.set_reachable(false);
    sides.target_broker.drop_connections();
    sides.source_broker.drop_connections();

    eventually("source reconnect", || sides.source.is_connected()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!bridge.is_running());

    sides.target_broker.set_reachable(true);
    eventually("bridge restart", || bridge.is_running()).await;
    assert_eq!(sides.source_broker.open_channels(), 1);
    assert_eq!(sides.target_broker.open_channels(), 1);
}

#[tokio::test]
async fn stopped_bridge_stays_stopped_after_reconnect() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events());
    bridge.start().await.unwrap();
    bridge.stop().await;

    sides.source_broker.drop_connections();
    eventually("source reconnect", || {
        sides.source.metrics().connections_established == 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!bridge.is_running());
    assert_eq!(sides.source_broker.open_channels(), 0);
    assert!(bridge.consumer_tags().is_empty());
}

#[tokio::test]
async fn failed_start_is_retried_on_reconnect() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events());

    sides.target_broker.set_reachable(false);
    sides.target_broker.drop_connections();
    assert!(bridge.start().await.unwrap_err().is_not_connected());

    sides.target_broker.set_reachable(true);
    eventually("bridge start", || bridge.is_running()).await;
}

#[tokio::test]
async fn close_unsubscribes_from_both_managers() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events());
    assert_eq!(sides.source.subscriber_count(), 1);
    assert_eq!(sides.target.subscriber_count(), 1);
    bridge.start().await.unwrap();

    bridge.close().await;

    assert_eq!(sides.source.subscriber_count(), 0);
    assert_eq!(sides.target.subscriber_count(), 0);
    assert!(!bridge.is_running());
    assert_eq!(sides.source_broker.open_channels(), 0);
}
