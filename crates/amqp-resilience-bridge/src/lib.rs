//! Broker-to-broker message forwarding.
//!
//! A [`Bridge`] consumes from exchanges on a source broker and republishes
//! every message to the same exchange and routing key on a target broker.
//! It owns one plain channel on the source and one confirm channel on the
//! target, and coordinates them directly: the source message is acked only
//! once the target has confirmed it.
//!
//! Forwarding failures follow a fixed policy:
//!
//! | Failure | Source message | Log |
//! |---------|----------------|-----|
//! | target channel closed | left unacked, redelivered after restart | rate-limited warning |
//! | first failure | nack, requeue | rate-limited error |
//! | failure of a redelivered message | nack, dropped | rate-limited error and drop warning |
//!
//! # Examples
//!
//! ```rust,no_run
//! use amqp_resilience_bridge::{Bridge, BridgeConfig};
//! # async fn example(
//! #     source: amqp_resilience_connection::ConnectionManager,
//! #     target: amqp_resilience_connection::ConnectionManager,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig::builder()
//!     .name("eu-to-us")
//!     .exchanges(["events", "audit"])
//!     .log_every(1_000)
//!     .on_start(|| println!("bridge running"))
//!     .build()?;
//!
//! let bridge = Bridge::new(&source, &target, config);
//! bridge.start().await?;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod config;
mod error;
mod events;
mod forward;
mod metrics;

pub use bridge::Bridge;
pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use error::{BridgeError, Side};
pub use events::BridgeEvent;
pub use forward::{ChannelClosedDetection, FailureAction};
pub use metrics::BridgeMetricsSnapshot;
