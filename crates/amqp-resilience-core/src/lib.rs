//! Core infrastructure for amqp-resilience.
//!
//! This crate provides the pieces shared by every resilient component:
//! - The boundary with the broker client library ([`broker`])
//! - Connection options and the connection state enum
//! - The event system used for observability hooks
//! - [`MetricsCollector`], the counters behind every snapshot
//! - [`ErrorLogLimiter`], which keeps a stuck downstream from flooding the logs
//! - [`ChannelSlot`], the owned channel handle that invalidates itself on closure

pub mod broker;
pub mod channel;
pub mod collector;
pub mod events;
pub mod limiter;
pub mod options;
pub mod state;

pub use broker::{
    Broker, BrokerChannel, BrokerConnection, BrokerError, CloseObserver, Delivery,
    DeliveryHandler, DeliveryMode, ErrorObserver, ExchangeKind, ExchangeOptions,
    MessageProperties, QueueOptions,
};
pub use channel::ChannelSlot;
pub use collector::{MetricsCollector, MetricsSnapshot};
pub use events::{ComponentEvent, EventListener, EventListeners, FnListener};
pub use limiter::{Admission, ErrorLogLimiter};
pub use options::{ConnectionOptions, OptionsError};
pub use state::ConnectionState;

/// Boxed error used for handler and subscriber failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Recovers the guard of a poisoned mutex.
///
/// Every lock in this workspace protects plain bookkeeping that stays
/// consistent between statements, so a panic elsewhere never invalidates it.
pub fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
