use super::{events, Sides};
use crate::support::LogCapture;
use amqp_resilience_bridge::{BridgeConfig, BridgeError, Side};
use amqp_resilience_connection::ConnectionManager;
use amqp_resilience_core::MessageProperties;
use amqp_resilience_testkit::MemoryBroker;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn forwards_body_exchange_and_routing_key() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events());
    bridge.start().await.unwrap();

    sides
        .source_broker
        .publish_external("events", "user.created", r#"{"id":1}"#)
        .unwrap();
    assert_eq!(sides.source_broker.dispatch().await, 1);

    let published = sides.target_broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "events");
    assert_eq!(published[0].routing_key, "user.created");
    assert_eq!(published[0].body, br#"{"id":1}"#);
    assert!(published[0].confirmed);
    assert!(published[0].properties.persistent);

    assert_eq!(sides.source_broker.acks().len(), 1);
    assert_eq!(sides.source_broker.unacked("bridge_events"), 0);
    assert_eq!(bridge.metrics().messages_forwarded, 1);
    assert!(bridge.metrics().last_forwarded_at.is_some());
}

#[tokio::test]
async fn transient_delivery_mode_is_applied() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events().delivery_mode(1));
    bridge.start().await.unwrap();

    sides
        .source_broker
        .publish_external("events", "a", "x")
        .unwrap();
    sides.source_broker.dispatch().await;

    assert!(!sides.target_broker.published()[0].properties.persistent);
}

#[tokio::test]
async fn missing_content_type_gets_the_configured_default() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events());
    bridge.start().await.unwrap();

    sides
        .source_broker
        .publish_external("events", "user.created", "{}")
        .unwrap();
    sides
        .source_broker
        .publish_external_with(
            "events",
            "user.created",
            "<user/>",
            MessageProperties {
                content_type: Some("application/xml".to_string()),
                ..MessageProperties::default()
            },
        )
        .unwrap();
    assert_eq!(sides.source_broker.dispatch().await, 2);

    let published = sides.target_broker.published();
    assert_eq!(
        published[0].properties.content_type.as_deref(),
        Some("application/json")
    );
    assert_eq!(
        published[1].properties.content_type.as_deref(),
        Some("application/xml")
    );
}

#[tokio::test]
async fn default_content_type_is_configurable() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events().content_type("text/plain"));
    bridge.start().await.unwrap();

    sides
        .source_broker
        .publish_external("events", "a", "x")
        .unwrap();
    sides.source_broker.dispatch().await;

    assert_eq!(
        sides.target_broker.published()[0]
            .properties
            .content_type
            .as_deref(),
        Some("text/plain")
    );
}

#[tokio::test]
async fn forwards_across_several_exchanges() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(
        BridgeConfig::builder()
            .exchanges(["events", "audit", "billing"])
            .log_every(0),
    );
    bridge.start().await.unwrap();

    for (index, exchange) in ["events", "audit", "billing"].iter().cycle().take(12).enumerate() {
        sides
            .source_broker
            .publish_external(exchange, &format!("key.{}", index), "x")
            .unwrap();
    }
    assert_eq!(sides.source_broker.dispatch().await, 12);

    assert_eq!(bridge.metrics().messages_forwarded, 12);
    let published = sides.target_broker.published();
    for exchange in ["events", "audit", "billing"] {
        assert_eq!(
            published
                .iter()
                .filter(|message| message.exchange == exchange)
                .count(),
            4
        );
    }
}

#[tokio::test]
async fn progress_is_logged_every_n_messages() {
    let (logs, _guard) = LogCapture::install();
    let sides = Sides::connect().await;
    let progress = Arc::new(Mutex::new(Vec::new()));
    let progress_clone = Arc::clone(&progress);
    let bridge = sides.bridge(
        BridgeConfig::builder()
            .exchanges(["events", "audit"])
            .log_every(3)
            .on_progress(move |forwarded| progress_clone.lock().unwrap().push(forwarded)),
    );
    bridge.start().await.unwrap();

    for index in 0..10 {
        let exchange = if index % 2 == 0 { "events" } else { "audit" };
        sides
            .source_broker
            .publish_external(exchange, "k", "x")
            .unwrap();
    }
    sides.source_broker.dispatch().await;

    assert_eq!(bridge.metrics().messages_forwarded, 10);
    assert_eq!(logs.count("bridge progress"), 3);
    assert_eq!(*progress.lock().unwrap(), vec![3, 6, 9]);
}

#[tokio::test]
async fn progress_logging_can_be_disabled() {
    let (logs, _guard) = LogCapture::install();
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events().log_every(0));
    bridge.start().await.unwrap();

    for _ in 0..5 {
        sides
            .source_broker
            .publish_external("events", "k", "x")
            .unwrap();
    }
    sides.source_broker.dispatch().await;

    assert_eq!(bridge.metrics().messages_forwarded, 5);
    assert_eq!(logs.count("bridge progress"), 0);
}

#[tokio::test]
async fn start_requires_both_sides() {
    let source_broker = MemoryBroker::new();
    let source = crate::support::connected(&source_broker, "source").await;
    let target = ConnectionManager::new(
        Arc::new(MemoryBroker::new()),
        crate::support::fast_config("target").build(),
    );
    let started = Arc::new(AtomicUsize::new(0));
    let started_clone = Arc::clone(&started);
    let bridge = amqp_resilience_bridge::Bridge::new(
        &source,
        &target,
        events()
            .on_start(move || {
                started_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap(),
    );

    let error = bridge.start().await.unwrap_err();

    assert!(matches!(error, BridgeError::NotConnected { side: Side::Target }));
    assert!(!bridge.is_running());
    assert_eq!(started.load(Ordering::SeqCst), 0);

    target.start().await.unwrap();
    assert!(bridge.is_running());
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_and_start_again() {
    let sides = Sides::connect().await;
    let stopped = Arc::new(AtomicUsize::new(0));
    let stopped_clone = Arc::clone(&stopped);
    let bridge = sides.bridge(events().on_stop(move || {
        stopped_clone.fetch_add(1, Ordering::SeqCst);
    }));
    bridge.start().await.unwrap();

    bridge.stop().await;
    assert!(!bridge.is_running());
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
    assert_eq!(sides.source_broker.open_channels(), 0);
    assert_eq!(sides.target_broker.open_channels(), 0);

    // Messages published while stopped wait in the durable source queue.
    sides
        .source_broker
        .publish_external("events", "k", "queued")
        .unwrap();
    assert_eq!(sides.source_broker.queue_depth("bridge_events"), 1);

    bridge.start().await.unwrap();
    sides.source_broker.dispatch().await;
    assert_eq!(sides.target_broker.published()[0].body, b"queued");
}

#[tokio::test]
async fn reset_metrics_clears_counters() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events());
    bridge.start().await.unwrap();
    sides
        .source_broker
        .publish_external("events", "k", "x")
        .unwrap();
    sides.source_broker.dispatch().await;

    bridge.reset_metrics();

    assert_eq!(bridge.metrics(), Default::default());
}
