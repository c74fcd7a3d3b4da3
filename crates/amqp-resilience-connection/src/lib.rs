//! Self-healing connection management for AMQP brokers.
//!
//! [`ConnectionManager`] owns one physical broker connection. It connects with
//! exponential backoff, watches the connection for closure, reconnects on its
//! own, and after every successful (re)connection runs the reconnect
//! subscribers registered by the producers, consumers and bridges built on
//! top of it.
//!
//! # Examples
//!
//! ```rust,no_run
//! use amqp_resilience_connection::{ConnectionConfig, ConnectionManager};
//! use std::time::Duration;
//! # use std::sync::Arc;
//! # async fn example(broker: Arc<dyn amqp_resilience_core::Broker>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::builder()
//!     .name("orders")
//!     .hostname("rabbit.internal")
//!     .initial_delay(Duration::from_millis(500))
//!     .max_delay(Duration::from_secs(30))
//!     .max_retries(5)
//!     .on_reconnecting(|attempt| println!("connection attempt {}", attempt))
//!     .build();
//!
//! let manager = ConnectionManager::connect(broker, config).await?;
//!
//! let _subscription = manager.on_reconnect(|| async {
//!     println!("connection (re)established");
//!     Ok::<_, std::io::Error>(())
//! });
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod events;
mod manager;
mod policy;
mod subscribers;

pub use config::{ConnectionConfig, ConnectionConfigBuilder};
pub use error::ConnectionError;
pub use events::ConnectionEvent;
pub use manager::ConnectionManager;
pub use policy::{Backoff, ReconnectPolicy};
pub use subscribers::ReconnectSubscription;

pub use amqp_resilience_core::{ConnectionOptions, ConnectionState, MetricsSnapshot};
