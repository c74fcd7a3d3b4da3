use super::{events, Sides};
use crate::support::LogCapture;
use amqp_resilience_bridge::{BridgeEvent, ChannelClosedDetection, FailureAction};
use amqp_resilience_core::BrokerError;
use std::sync::{Arc, Mutex};

fn rejected() -> BrokerError {
    BrokerError::Protocol {
        code: 406,
        text: "PRECONDITION_FAILED - message rejected".to_string(),
    }
}

/// Collects the action of every failed forward.
fn recording_actions() -> (Arc<Mutex<Vec<FailureAction>>>, impl Fn(&BridgeEvent) + Send + Sync) {
    let actions = Arc::new(Mutex::new(Vec::new()));
    let actions_clone = Arc::clone(&actions);
    let listener = move |event: &BridgeEvent| {
        if let BridgeEvent::ForwardFailed { action, .. } = event {
            actions_clone.lock().unwrap().push(*action);
        }
    };
    (actions, listener)
}

#[tokio::test]
async fn failed_forward_is_requeued_once_then_dropped() {
    let (logs, _guard) = LogCapture::install();
    let sides = Sides::connect().await;
    let (actions, listener) = recording_actions();
    let bridge = sides.bridge(events().on_event(listener));
    bridge.start().await.unwrap();

    sides.target_broker.fail_next_publish(rejected());
    sides.target_broker.fail_next_publish(rejected());
    sides
        .source_broker
        .publish_external("events", "order.placed", "x")
        .unwrap();

    // First delivery plus its redelivery.
    assert_eq!(sides.source_broker.dispatch().await, 2);

    let nacks = sides.source_broker.nacks();
    assert_eq!(nacks.len(), 2);
    assert!(nacks[0].requeue && !nacks[0].redelivered);
    assert!(!nacks[1].requeue && nacks[1].redelivered);
    assert_eq!(sides.source_broker.queue_depth("bridge_events"), 0);
    assert!(sides.target_broker.published().is_empty());

    let metrics = bridge.metrics();
    assert_eq!(metrics.messages_failed, 2);
    assert_eq!(metrics.messages_dropped, 1);
    assert_eq!(metrics.messages_forwarded, 0);
    assert_eq!(
        *actions.lock().unwrap(),
        vec![FailureAction::Requeue, FailureAction::Drop]
    );
    assert_eq!(logs.count("failed to forward message"), 2);
    assert_eq!(logs.count("dropping message after repeated forwarding failure"), 1);
}

#[tokio::test]
async fn transient_failure_is_forwarded_on_redelivery() {
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events());
    bridge.start().await.unwrap();

    sides.target_broker.fail_next_publish(rejected());
    sides
        .source_broker
        .publish_external("events", "k", "retry me")
        .unwrap();
    sides.source_broker.dispatch().await;

    assert_eq!(sides.target_broker.published()[0].body, b"retry me");
    assert_eq!(sides.source_broker.acks().len(), 1);
    assert_eq!(bridge.metrics().messages_failed, 1);
    assert_eq!(bridge.metrics().messages_forwarded, 1);
    assert_eq!(bridge.metrics().messages_dropped, 0);
}

#[tokio::test]
async fn closed_target_channel_strands_message() {
    let sides = Sides::connect().await;
    let (actions, listener) = recording_actions();
    let bridge = sides.bridge(events().on_event(listener));
    bridge.start().await.unwrap();

    sides.target_broker.close_all_channels();
    assert!(!bridge.is_running());

    sides
        .source_broker
        .publish_external("events", "k", "stranded")
        .unwrap();
    assert_eq!(sides.source_broker.dispatch().await, 1);

    assert_eq!(bridge.stranded(), 1);
    assert_eq!(sides.source_broker.unacked("bridge_events"), 1);
    assert!(sides.source_broker.nacks().is_empty());
    assert!(sides.source_broker.acks().is_empty());
    assert_eq!(*actions.lock().unwrap(), vec![FailureAction::Strand]);
    assert_eq!(bridge.metrics().messages_dropped, 0);
}

#[tokio::test]
async fn restart_returns_stranded_messages() {
    let sides = Sides::connect().await;
    let returned = Arc::new(Mutex::new(Vec::new()));
    let returned_clone = Arc::clone(&returned);
    let bridge = sides.bridge(events().on_event(move |event| {
        if let BridgeEvent::StrandedReturned { count, .. } = event {
            returned_clone.lock().unwrap().push(*count);
        }
    }));
    bridge.start().await.unwrap();

    sides.target_broker.close_all_channels();
    sides
        .source_broker
        .publish_external("events", "k", "stranded")
        .unwrap();
    sides.source_broker.dispatch().await;
    assert_eq!(bridge.stranded(), 1);

    bridge.start().await.unwrap();
    assert!(bridge.is_running());
    assert_eq!(bridge.stranded(), 0);
    assert_eq!(*returned.lock().unwrap(), vec![1]);
    assert_eq!(sides.source_broker.unacked("bridge_events"), 0);
    assert_eq!(sides.source_broker.queue_depth("bridge_events"), 1);

    assert_eq!(sides.source_broker.dispatch().await, 1);
    let published = sides.target_broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].body, b"stranded");
    assert_eq!(sides.source_broker.acks().len(), 1);
}

#[tokio::test]
async fn strand_warnings_are_rate_limited() {
    let (logs, _guard) = LogCapture::install();
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events().error_log_burst(2));
    bridge.start().await.unwrap();

    sides.target_broker.close_all_channels();
    for index in 0..5 {
        sides
            .source_broker
            .publish_external("events", &format!("k.{}", index), "x")
            .unwrap();
    }
    sides.source_broker.dispatch().await;

    assert_eq!(bridge.stranded(), 5);
    assert_eq!(bridge.metrics().messages_failed, 5);
    assert_eq!(
        logs.count("target channel closed, leaving message for redelivery"),
        2
    );
}

#[tokio::test]
async fn stop_reports_suppressed_failure_logs() {
    let (logs, _guard) = LogCapture::install();
    let sides = Sides::connect().await;
    let bridge = sides.bridge(events().error_log_burst(2));
    bridge.start().await.unwrap();

    sides.target_broker.close_all_channels();
    for index in 0..5 {
        sides
            .source_broker
            .publish_external("events", &format!("k.{}", index), "x")
            .unwrap();
    }
    sides.source_broker.dispatch().await;
    assert_eq!(logs.count("suppressed 3 error log lines"), 0);

    bridge.stop().await;
    assert_eq!(logs.count("suppressed 3 error log lines"), 1);

    bridge.stop().await;
    assert_eq!(logs.count("error log lines in the previous window"), 1);
}

#[tokio::test]
async fn substring_detection_misses_connection_errors() {
    let sides = Sides::connect().await;
    let (actions, listener) = recording_actions();
    let bridge = sides.bridge(
        events()
            .channel_closed_detection(ChannelClosedDetection::Substring)
            .on_event(listener),
    );
    bridge.start().await.unwrap();

    sides
        .target_broker
        .fail_next_publish(BrokerError::ConnectionClosed("CONNECTION_FORCED".to_string()));
    sides
        .source_broker
        .publish_external("events", "k", "x")
        .unwrap();
    sides.source_broker.dispatch().await;

    // Treated as an ordinary failure: requeued, then forwarded.
    assert_eq!(*actions.lock().unwrap(), vec![FailureAction::Requeue]);
    assert_eq!(bridge.stranded(), 0);
    assert_eq!(bridge.metrics().messages_forwarded, 1);
}

#[tokio::test]
async fn structured_detection_strands_on_connection_errors() {
    let sides = Sides::connect().await;
    let (actions, listener) = recording_actions();
    let bridge = sides.bridge(events().on_event(listener));
    bridge.start().await.unwrap();

    sides
        .target_broker
        .fail_next_publish(BrokerError::ConnectionClosed("CONNECTION_FORCED".to_string()));
    sides
        .source_broker
        .publish_external("events", "k", "x")
        .unwrap();
    sides.source_broker.dispatch().await;

    assert_eq!(*actions.lock().unwrap(), vec![FailureAction::Strand]);
    assert_eq!(bridge.stranded(), 1);
    assert_eq!(bridge.metrics().messages_forwarded, 0);
}
