//! Counters behind connection, producer and consumer metrics.

use crate::lock;
use crate::state::ConnectionState;
#[cfg(feature = "metrics")]
use metrics::{counter, gauge};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Point-in-time copy of every counter.
///
/// Counters only grow; [`MetricsCollector::reset`] is the single way back to zero.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    /// Current connection state.
    pub connection_state: ConnectionState,
    /// Successful (re)connections.
    pub connections_established: u64,
    /// Connections closed underneath the manager.
    pub connections_lost: u64,
    /// Attempt number of the reconnect loop in progress (0 when idle).
    pub reconnect_attempt: u32,
    /// Messages confirmed by the broker.
    pub messages_published: u64,
    /// Publishes rejected, unconfirmed, or attempted without a channel.
    pub publish_failures: u64,
    /// Messages handled and acknowledged.
    pub messages_consumed: u64,
    /// Messages whose handler failed.
    pub consume_failures: u64,
    /// When the last connection was established.
    pub last_connected_at: Option<SystemTime>,
    /// When the last connection was lost.
    pub last_disconnected_at: Option<SystemTime>,
    /// When the last message was confirmed.
    pub last_published_at: Option<SystemTime>,
    /// When the last message was consumed.
    pub last_consumed_at: Option<SystemTime>,
}

/// Shared, cloneable metrics bookkeeping.
///
/// Clones share the same counters, so a connection manager can lend its
/// collector to the producers and consumers created on it.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    name: Arc<str>,
    snapshot: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    /// Creates a collector whose metric labels carry `name`.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            snapshot: Arc::new(Mutex::new(MetricsSnapshot::default())),
        }
    }

    /// Returns the label name of this collector.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        lock(&self.snapshot).clone()
    }

    /// Zeroes every counter, clears timestamps and returns the state to disconnected.
    pub fn reset(&self) {
        *lock(&self.snapshot) = MetricsSnapshot::default();
    }

    /// Records the current connection state.
    pub fn set_connection_state(&self, state: ConnectionState) {
        lock(&self.snapshot).connection_state = state;

        #[cfg(feature = "metrics")]
        gauge!("amqp_connection_state", "connection" => self.name.to_string())
            .set(state_gauge(state));
    }

    /// Records the attempt number of the reconnect loop.
    pub fn set_reconnect_attempt(&self, attempt: u32) {
        lock(&self.snapshot).reconnect_attempt = attempt;

        #[cfg(feature = "metrics")]
        gauge!("amqp_reconnect_attempt", "connection" => self.name.to_string())
            .set(f64::from(attempt));
    }

    /// Records a successful (re)connection.
    pub fn record_connection_established(&self) {
        {
            let mut snapshot = lock(&self.snapshot);
            snapshot.connections_established += 1;
            snapshot.last_connected_at = Some(SystemTime::now());
        }

        #[cfg(feature = "metrics")]
        counter!("amqp_connections_established_total", "connection" => self.name.to_string())
            .increment(1);
    }

    /// Records a connection closed underneath the manager.
    pub fn record_connection_lost(&self) {
        {
            let mut snapshot = lock(&self.snapshot);
            snapshot.connections_lost += 1;
            snapshot.last_disconnected_at = Some(SystemTime::now());
        }

        #[cfg(feature = "metrics")]
        counter!("amqp_connections_lost_total", "connection" => self.name.to_string())
            .increment(1);
    }

    /// Records a confirmed publish.
    pub fn record_message_published(&self) {
        {
            let mut snapshot = lock(&self.snapshot);
            snapshot.messages_published += 1;
            snapshot.last_published_at = Some(SystemTime::now());
        }

        #[cfg(feature = "metrics")]
        counter!("amqp_messages_published_total", "connection" => self.name.to_string(), "outcome" => "success")
            .increment(1);
    }

    /// Records a failed publish.
    pub fn record_publish_failure(&self) {
        lock(&self.snapshot).publish_failures += 1;

        #[cfg(feature = "metrics")]
        counter!("amqp_messages_published_total", "connection" => self.name.to_string(), "outcome" => "failure")
            .increment(1);
    }

    /// Records a handled and acknowledged message.
    pub fn record_message_consumed(&self) {
        {
            let mut snapshot = lock(&self.snapshot);
            snapshot.messages_consumed += 1;
            snapshot.last_consumed_at = Some(SystemTime::now());
        }

        #[cfg(feature = "metrics")]
        counter!("amqp_messages_consumed_total", "connection" => self.name.to_string(), "outcome" => "success")
            .increment(1);
    }

    /// Records a message whose handler failed.
    pub fn record_consume_failure(&self) {
        lock(&self.snapshot).consume_failures += 1;

        #[cfg(feature = "metrics")]
        counter!("amqp_messages_consumed_total", "connection" => self.name.to_string(), "outcome" => "failure")
            .increment(1);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new("<unnamed>")
    }
}

#[cfg(feature = "metrics")]
fn state_gauge(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Reconnecting => 3.0,
    }
}
