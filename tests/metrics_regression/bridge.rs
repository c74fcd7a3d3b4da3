//! Bridge metrics regression tests

use super::helpers::*;
use crate::support::connected;
use amqp_resilience_bridge::{Bridge, BridgeConfig};
use amqp_resilience_core::BrokerError;
use amqp_resilience_testkit::MemoryBroker;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn bridge_metrics_exist() {
    init_recorder();

    let source_broker = MemoryBroker::new();
    let target_broker = MemoryBroker::new();
    let source = connected(&source_broker, "metrics_source").await;
    let target = connected(&target_broker, "metrics_target").await;
    let bridge = Bridge::new(
        &source,
        &target,
        BridgeConfig::builder()
            .name("metrics_bridge")
            .exchange("events")
            .build()
            .unwrap(),
    );
    bridge.start().await.unwrap();

    source_broker.publish_external("events", "a", "x").unwrap();
    source_broker.dispatch().await;

    let rejected = || BrokerError::Protocol {
        code: 406,
        text: "PRECONDITION_FAILED".to_string(),
    };
    target_broker.fail_next_publish(rejected());
    target_broker.fail_next_publish(rejected());
    source_broker.publish_external("events", "b", "y").unwrap();
    source_broker.dispatch().await;

    for name in [
        "amqp_bridge_messages_forwarded_total",
        "amqp_bridge_messages_failed_total",
        "amqp_bridge_messages_dropped_total",
    ] {
        assert_counter_exists(name);
        assert_metric_has_label(name, "bridge", "metrics_bridge");
    }
}
