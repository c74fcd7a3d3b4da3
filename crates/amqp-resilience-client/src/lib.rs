//! Self-recovering AMQP producer and consumer.
//!
//! Both components own one channel on a
//! [`ConnectionManager`](amqp_resilience_connection::ConnectionManager) and
//! subscribe to its reconnects. After every reconnect they open a fresh
//! channel and declare their topology again; a [`Consumer`] that was
//! consuming also resumes on its own.
//!
//! | Component | Channel | Failure policy |
//! |-----------|---------|----------------|
//! | [`Producer`] | confirm | no channel: immediate [`ClientError::NotReady`] |
//! | [`Consumer`] | plain, with prefetch | handler failure: nack, requeue once |
//!
//! # Examples
//!
//! ```rust,no_run
//! use amqp_resilience_client::{Producer, ProducerConfig};
//! # async fn example(manager: amqp_resilience_connection::ConnectionManager) -> Result<(), Box<dyn std::error::Error>> {
//! let producer = Producer::new(
//!     &manager,
//!     ProducerConfig::builder().exchange("events").build()?,
//! )
//! .await?;
//!
//! producer.publish("user.created", r#"{"id":1}"#).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod consumer;
mod error;
mod events;
mod lifecycle;
mod producer;

pub use config::{
    ConsumerConfig, ConsumerConfigBuilder, ErrorCallback, ProducerConfig, ProducerConfigBuilder,
};
pub use consumer::Consumer;
pub use error::ClientError;
pub use events::ClientEvent;
pub use lifecycle::ConsumerLifecycle;
pub use producer::{Producer, PublishOverrides};

pub use amqp_resilience_core::{BoxError, Delivery, DeliveryMode, ExchangeKind};
