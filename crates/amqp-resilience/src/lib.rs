//! Self-healing AMQP connections and the components built on them.
//!
//! `amqp-resilience` keeps an application talking to an AMQP broker through
//! connection loss. Each component is available as an individual crate and
//! as a feature of this meta-crate.
//!
//! # Components
//!
//! - **Connection manager** (always available): connects with exponential
//!   backoff, reconnects on loss and notifies reconnect subscribers
//! - **Producer and Consumer** (`client` feature): own one channel each and
//!   rebuild it, with their topology, after every reconnect
//! - **Bridge** (`bridge` feature): forwards messages between two brokers,
//!   acking on the source only after the target confirms
//! - **Testkit** (`testkit` feature): an in-memory broker for tests
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! amqp-resilience = { version = "0.1", features = ["client"] }
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(all(feature = "client", feature = "testkit"))]
//! # {
//! use amqp_resilience::client::{Consumer, ConsumerConfig, Delivery};
//! use amqp_resilience::connection::{ConnectionConfig, ConnectionManager};
//! use amqp_resilience::testkit::MemoryBroker;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::builder()
//!     .name("orders")
//!     .initial_delay(Duration::from_millis(500))
//!     .max_retries(10)
//!     .on_reconnecting(|attempt| println!("reconnect attempt {attempt}"))
//!     .build();
//! let manager = ConnectionManager::connect(Arc::new(MemoryBroker::new()), config).await?;
//!
//! let handler = tower::service_fn(|delivery: Delivery| async move {
//!     println!("{}", delivery.routing_key);
//!     Ok::<_, amqp_resilience::core::BoxError>(())
//! });
//! let consumer = Consumer::new(&manager, ConsumerConfig::builder("orders").build()?, handler).await?;
//! consumer.start().await?;
//! # Ok(())
//! # }
//! # }
//! ```

// Re-export core and the connection manager (always available)
pub use amqp_resilience_connection as connection;
pub use amqp_resilience_core as core;

// Re-export components based on features
#[cfg(feature = "bridge")]
pub use amqp_resilience_bridge as bridge;

#[cfg(feature = "client")]
pub use amqp_resilience_client as client;

#[cfg(feature = "testkit")]
pub use amqp_resilience_testkit as testkit;

pub use amqp_resilience_connection::{ConnectionConfig, ConnectionError, ConnectionManager};
pub use amqp_resilience_core::{ConnectionOptions, ConnectionState, MetricsSnapshot};
