//! Bridge tests.
//!
//! Test organization:
//! - forwarding.rs: forwarding, progress logging, lifecycle
//! - failures.rs: requeue/drop policy and stranded deliveries
//! - recovery.rs: restarts after either side reconnects

mod failures;
mod forwarding;
mod recovery;

use crate::support::connected;
use amqp_resilience_bridge::{Bridge, BridgeConfig, BridgeConfigBuilder};
use amqp_resilience_connection::ConnectionManager;
use amqp_resilience_testkit::MemoryBroker;

/// Two brokers, each with a connected manager.
pub(crate) struct Sides {
    pub source_broker: MemoryBroker,
    pub target_broker: MemoryBroker,
    pub source: ConnectionManager,
    pub target: ConnectionManager,
}

impl Sides {
    pub(crate) async fn connect() -> Self {
        let source_broker = MemoryBroker::new();
        let target_broker = MemoryBroker::new();
        let source = connected(&source_broker, "source").await;
        let target = connected(&target_broker, "target").await;
        Self {
            source_broker,
            target_broker,
            source,
            target,
        }
    }

    pub(crate) fn bridge(&self, config: BridgeConfigBuilder) -> Bridge {
        Bridge::new(&self.source, &self.target, config.build().unwrap())
    }
}

pub(crate) fn events() -> BridgeConfigBuilder {
    BridgeConfig::builder().name("test-bridge").exchange("events")
}
