use crate::support::{eventually, fast_config};
use amqp_resilience_connection::{ConnectionEvent, ConnectionManager};
use amqp_resilience_testkit::MemoryBroker;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn recorded_delays(
    name: &str,
    initial: Duration,
    max: Duration,
) -> (amqp_resilience_connection::ConnectionConfig, Arc<Mutex<Vec<Duration>>>) {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let delays_clone = Arc::clone(&delays);
    let config = fast_config(name)
        .initial_delay(initial)
        .max_delay(max)
        .on_event(move |event| {
            if let ConnectionEvent::AttemptFailed { delay, .. } = event {
                delays_clone.lock().unwrap().push(*delay);
            }
        })
        .build();
    (config, delays)
}

#[tokio::test(start_paused = true)]
async fn delays_double_up_to_the_cap() {
    let broker = MemoryBroker::new();
    broker.refuse_next_connects(5);
    let (config, delays) = recorded_delays(
        "doubling",
        Duration::from_millis(100),
        Duration::from_millis(500),
    );

    ConnectionManager::connect(Arc::new(broker.clone()), config)
        .await
        .unwrap();

    assert_eq!(
        *delays.lock().unwrap(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(500),
            Duration::from_millis(500),
        ]
    );
    assert_eq!(broker.connect_attempts(), 6);
}

#[tokio::test(start_paused = true)]
async fn attempts_are_spaced_by_the_delay() {
    let broker = MemoryBroker::new();
    broker.refuse_next_connects(2);
    let (config, _) = recorded_delays("spacing", Duration::from_secs(1), Duration::from_secs(30));

    let started = tokio::time::Instant::now();
    ConnectionManager::connect(Arc::new(broker), config)
        .await
        .unwrap();

    // 1s after the first failure, 2s after the second.
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn each_outage_starts_from_the_initial_delay() {
    let broker = MemoryBroker::new();
    broker.refuse_next_connects(3);
    let (config, delays) = recorded_delays(
        "reset",
        Duration::from_millis(50),
        Duration::from_secs(1),
    );
    let manager = ConnectionManager::connect(Arc::new(broker.clone()), config)
        .await
        .unwrap();
    assert_eq!(delays.lock().unwrap().len(), 3);

    broker.refuse_next_connects(2);
    broker.drop_connections();
    eventually("second recovery", || manager.metrics().connections_established == 2).await;

    assert_eq!(
        delays.lock().unwrap()[3..],
        [Duration::from_millis(50), Duration::from_millis(100)]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_attempts_are_counted_in_metrics() {
    let broker = MemoryBroker::new();
    broker.set_reachable(false);
    let manager = ConnectionManager::new(
        Arc::new(broker.clone()),
        fast_config("counting").build(),
    );
    let starter = manager.clone();
    tokio::spawn(async move { starter.start().await });

    eventually("third attempt", || broker.connect_attempts() >= 3).await;
    assert!(manager.metrics().reconnect_attempt >= 3);

    broker.set_reachable(true);
    eventually("connection", || manager.is_connected()).await;
    assert_eq!(manager.metrics().reconnect_attempt, 0);
}
