//! Producer and consumer metrics regression tests

use super::helpers::*;
use crate::support::connected;
use amqp_resilience_client::{
    BoxError, Consumer, ConsumerConfig, Delivery, Producer, ProducerConfig,
};
use amqp_resilience_core::BrokerError;
use amqp_resilience_testkit::MemoryBroker;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn producer_metrics_exist() {
    init_recorder();

    let broker = MemoryBroker::new();
    let manager = connected(&broker, "metrics_producer").await;
    let producer = Producer::new(
        &manager,
        ProducerConfig::builder().exchange("events").build().unwrap(),
    )
    .await
    .unwrap();

    producer.publish("user.created", "x").await.unwrap();
    broker.fail_next_publish(BrokerError::NotConfirmed);
    assert!(producer.publish("user.created", "y").await.is_err());

    assert_counter_exists("amqp_messages_published_total");
    assert_metric_has_label(
        "amqp_messages_published_total",
        "connection",
        "metrics_producer",
    );
    assert_metric_has_label("amqp_messages_published_total", "outcome", "success");
    assert_metric_has_label("amqp_messages_published_total", "outcome", "failure");
}

#[tokio::test]
#[serial]
async fn consumer_metrics_exist() {
    init_recorder();

    let broker = MemoryBroker::new();
    let manager = connected(&broker, "metrics_consumer").await;
    let handler = tower::service_fn(|delivery: Delivery| async move {
        if delivery.body == b"fail" {
            Err::<(), BoxError>("rejected".into())
        } else {
            Ok(())
        }
    });
    let consumer = Consumer::new(
        &manager,
        ConsumerConfig::builder("metrics_jobs").build().unwrap(),
        handler,
    )
    .await
    .unwrap();
    consumer.start().await.unwrap();

    broker.publish_external("", "metrics_jobs", "ok").unwrap();
    broker.publish_external("", "metrics_jobs", "fail").unwrap();
    broker.dispatch().await;

    assert_counter_exists("amqp_messages_consumed_total");
    assert_metric_has_label(
        "amqp_messages_consumed_total",
        "connection",
        "metrics_consumer",
    );
    assert_metric_has_label("amqp_messages_consumed_total", "outcome", "success");
    assert_metric_has_label("amqp_messages_consumed_total", "outcome", "failure");
}
