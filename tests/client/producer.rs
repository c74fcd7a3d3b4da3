use crate::support::{connected, eventually};
use amqp_resilience_client::{
    ClientError, ClientEvent, DeliveryMode, Producer, ProducerConfig, PublishOverrides,
};
use amqp_resilience_core::BrokerError;
use amqp_resilience_testkit::MemoryBroker;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Serialize)]
struct UserCreated {
    id: u32,
    name: &'static str,
}

#[tokio::test]
async fn published_messages_reach_bound_queue() {
    let broker = MemoryBroker::new();
    let manager = connected(&broker, "producer").await;
    let config = ProducerConfig::builder()
        .exchange("events")
        .queue("audit")
        .routing_pattern("user.#")
        .build()
        .unwrap();
    let producer = Producer::new(&manager, config).await.unwrap();

    producer.publish("user.created", "a").await.unwrap();
    producer.publish("order.created", "b").await.unwrap();

    assert_eq!(broker.published().len(), 2);
    assert!(broker.published().iter().all(|message| message.confirmed));
    assert_eq!(broker.queue_depth("audit"), 1);
    assert_eq!(producer.metrics().messages_published, 2);
    assert!(producer.metrics().last_published_at.is_some());
}

#[tokio::test]
async fn publish_json_sets_content_type() {
    let broker = MemoryBroker::new();
    let manager = connected(&broker, "json").await;
    let producer = Producer::new(
        &manager,
        ProducerConfig::builder()
            .exchange("events")
            .content_type("text/plain")
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    producer
        .publish_json("user.created", &UserCreated { id: 7, name: "ada" })
        .await
        .unwrap();

    let published = &broker.published()[0];
    assert_eq!(published.body, br#"{"id":7,"name":"ada"}"#);
    assert_eq!(
        published.properties.content_type.as_deref(),
        Some("application/json")
    );
    assert!(published.properties.persistent);
}

#[tokio::test]
async fn overrides_apply_to_one_message() {
    let broker = MemoryBroker::new();
    let manager = connected(&broker, "overrides").await;
    let producer = Producer::new(
        &manager,
        ProducerConfig::builder().exchange("events").build().unwrap(),
    )
    .await
    .unwrap();

    producer
        .publish_with(
            "user.created",
            "x",
            PublishOverrides::default()
                .delivery_mode(DeliveryMode::Transient)
                .header("trace-id", "abc"),
        )
        .await
        .unwrap();
    producer.publish("user.created", "y").await.unwrap();

    let published = broker.published();
    assert!(!published[0].properties.persistent);
    assert_eq!(published[0].properties.headers["trace-id"], "abc");
    assert!(published[1].properties.persistent);
    assert!(published[1].properties.headers.is_empty());
}

#[tokio::test]
async fn invalid_delivery_mode_is_rejected_at_build_time() {
    let result = ProducerConfig::builder().delivery_mode(0).build();
    assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
}

#[tokio::test]
async fn unconfirmed_publish_is_reported() {
    let broker = MemoryBroker::new();
    let manager = connected(&broker, "nack").await;
    let failures = Arc::new(Mutex::new(Vec::new()));
    let failures_clone = Arc::clone(&failures);
    let producer = Producer::new(
        &manager,
        ProducerConfig::builder()
            .exchange("events")
            .on_publish_failed(move |routing_key, error| {
                failures_clone
                    .lock()
                    .unwrap()
                    .push((routing_key.to_string(), error.to_string()));
            })
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    broker.fail_next_publish(BrokerError::NotConfirmed);
    let error = producer.publish("user.created", "x").await.unwrap_err();

    assert!(matches!(
        error,
        ClientError::PublishFailed(BrokerError::NotConfirmed)
    ));
    assert_eq!(producer.metrics().publish_failures, 1);
    assert_eq!(producer.metrics().messages_published, 0);
    assert_eq!(failures.lock().unwrap()[0].0, "user.created");

    producer.publish("user.created", "y").await.unwrap();
    assert_eq!(producer.metrics().messages_published, 1);
}

#[tokio::test]
async fn producer_recovers_after_connection_drop() {
    let broker = MemoryBroker::new();
    let manager = connected(&broker, "recovery").await;
    let recovered = Arc::new(AtomicUsize::new(0));
    let recovered_clone = Arc::clone(&recovered);
    let producer = Producer::new(
        &manager,
        ProducerConfig::builder()
            .exchange("events")
            .queue("audit")
            .on_event(move |event| {
                if matches!(event, ClientEvent::Recovered { .. }) {
                    recovered_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    broker.drop_connections();
    assert!(!producer.is_ready());
    let error = producer.publish("user.created", "lost").await.unwrap_err();
    assert!(error.is_not_ready());

    eventually("producer recovery", || producer.is_ready()).await;
    assert_eq!(recovered.load(Ordering::SeqCst), 1);

    producer.publish("user.created", "kept").await.unwrap();
    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].body, b"kept");
    assert_eq!(broker.queue_depth("audit"), 1);

    let metrics = producer.metrics();
    assert_eq!(metrics.publish_failures, 1);
    assert_eq!(metrics.messages_published, 1);
    assert_eq!(metrics.connections_established, 2);
}

#[tokio::test]
async fn close_stops_recovery() {
    let broker = MemoryBroker::new();
    let manager = connected(&broker, "closed").await;
    let producer = Producer::new(&manager, ProducerConfig::builder().build().unwrap())
        .await
        .unwrap();

    producer.close().await;
    assert_eq!(manager.subscriber_count(), 0);
    assert!(!producer.is_ready());

    broker.drop_connections();
    eventually("reconnect", || manager.is_connected()).await;
    assert!(!producer.is_ready());
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test(start_paused = true)]
async fn close_during_recovery_releases_the_new_channel() {
    let broker = MemoryBroker::new();
    let manager = connected(&broker, "close-during-recovery").await;
    let producer = Producer::new(
        &manager,
        ProducerConfig::builder().exchange("events").build().unwrap(),
    )
    .await
    .unwrap();

    broker.set_channel_delay(Some(Duration::from_millis(100)));
    broker.drop_connections();
    eventually("reconnect attempt", || broker.connect_attempts() == 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!producer.is_ready());

    producer.close().await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!producer.is_ready());
    assert_eq!(broker.open_channels(), 0);
    let error = producer.publish("user.created", "late").await.unwrap_err();
    assert!(error.is_not_ready());
    assert!(broker.published().is_empty());
}
