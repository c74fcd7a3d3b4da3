//! Connection manager metrics regression tests

use super::helpers::*;
use crate::support::{connected, fast_config};
use amqp_resilience_connection::ConnectionManager;
use amqp_resilience_testkit::MemoryBroker;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn connection_metrics_exist() {
    init_recorder();

    let broker = MemoryBroker::new();
    let manager = connected(&broker, "metrics_connection").await;

    assert_counter_exists("amqp_connections_established_total");
    assert_metric_has_label(
        "amqp_connections_established_total",
        "connection",
        "metrics_connection",
    );

    assert_gauge_exists("amqp_connection_state");
    assert_metric_has_label("amqp_connection_state", "connection", "metrics_connection");

    assert_gauge_exists("amqp_reconnect_attempt");
    assert_metric_has_label("amqp_reconnect_attempt", "connection", "metrics_connection");

    manager.close().await;
}

#[tokio::test]
#[serial]
async fn connection_lost_metrics() {
    init_recorder();

    let broker = MemoryBroker::new();
    let manager = connected(&broker, "metrics_lost").await;
    broker.drop_connections();

    assert_counter_exists("amqp_connections_lost_total");
    assert_metric_has_label("amqp_connections_lost_total", "connection", "metrics_lost");

    manager.close().await;
}

#[tokio::test(start_paused = true)]
#[serial]
async fn failed_attempts_set_reconnect_gauge() {
    init_recorder();

    let broker = MemoryBroker::new();
    broker.set_reachable(false);
    let manager = ConnectionManager::new(
        Arc::new(broker.clone()),
        fast_config("metrics_retry")
            .max_retries(2)
            .initial_delay(Duration::from_millis(10))
            .build(),
    );
    assert!(manager.start().await.is_err());

    assert_gauge_exists("amqp_reconnect_attempt");
    assert_metric_has_label("amqp_reconnect_attempt", "connection", "metrics_retry");
    assert_metric_has_label("amqp_connection_state", "connection", "metrics_retry");
}
