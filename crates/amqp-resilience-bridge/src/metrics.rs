use amqp_resilience_core::lock;
#[cfg(feature = "metrics")]
use ::metrics::counter;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BridgeMetricsSnapshot {
    /// Messages confirmed by the target and acknowledged on the source.
    pub messages_forwarded: u64,
    /// Forwards that failed for any reason.
    pub messages_failed: u64,
    /// Messages rejected without requeue after failing twice.
    pub messages_dropped: u64,
    /// When the last message was forwarded.
    pub last_forwarded_at: Option<SystemTime>,
}

/// Shared bridge counters.
#[derive(Debug, Clone)]
pub(crate) struct BridgeMetrics {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    name: Arc<str>,
    snapshot: Arc<Mutex<BridgeMetricsSnapshot>>,
}

impl BridgeMetrics {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            snapshot: Arc::new(Mutex::new(BridgeMetricsSnapshot::default())),
        }
    }

    pub(crate) fn snapshot(&self) -> BridgeMetricsSnapshot {
        lock(&self.snapshot).clone()
    }

    pub(crate) fn reset(&self) {
        *lock(&self.snapshot) = BridgeMetricsSnapshot::default();
    }

    /// Returns the forwarded count including this message.
    pub(crate) fn record_forwarded(&self) -> u64 {
        let forwarded = {
            let mut snapshot = lock(&self.snapshot);
            snapshot.messages_forwarded += 1;
            snapshot.last_forwarded_at = Some(SystemTime::now());
            snapshot.messages_forwarded
        };

        #[cfg(feature = "metrics")]
        counter!("amqp_bridge_messages_forwarded_total", "bridge" => self.name.to_string())
            .increment(1);

        forwarded
    }

    pub(crate) fn record_failed(&self) {
        lock(&self.snapshot).messages_failed += 1;

        #[cfg(feature = "metrics")]
        counter!("amqp_bridge_messages_failed_total", "bridge" => self.name.to_string())
            .increment(1);
    }

    pub(crate) fn record_dropped(&self) {
        lock(&self.snapshot).messages_dropped += 1;

        #[cfg(feature = "metrics")]
        counter!("amqp_bridge_messages_dropped_total", "bridge" => self.name.to_string())
            .increment(1);
    }
}
