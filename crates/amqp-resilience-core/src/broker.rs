//! Boundary with the broker client library.
//!
//! The resilience layer never speaks the wire protocol itself. It drives a
//! broker client through the three object-safe traits in this module:
//! [`Broker`] opens connections, [`BrokerConnection`] opens channels and
//! reports closure, and [`BrokerChannel`] carries topology declarations,
//! consumption, acknowledgements and publishing.
//!
//! Asynchronous methods return [`BoxFuture`] so the traits can be used as
//! `dyn` objects by every component.

use crate::options::ConnectionOptions;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Errors reported by the broker client library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The broker could not be reached or refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The connection was closed underneath the caller.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The channel was closed underneath the caller.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// The broker negatively confirmed a published message.
    #[error("message was not confirmed by the broker")]
    NotConfirmed,

    /// The broker rejected an operation with a protocol reply code.
    #[error("protocol error {code}: {text}")]
    Protocol {
        /// AMQP reply code (e.g. 404, 406).
        code: u16,
        /// Reply text sent by the broker.
        text: String,
    },

    /// Any other failure, described only by text.
    #[error("{0}")]
    Other(String),
}

impl BrokerError {
    /// Returns true if this failure means the channel (or its connection) is gone.
    ///
    /// The structured variants answer first. Collaborators that only report
    /// free text are matched on the `"channel closed"` substring.
    pub fn is_channel_closed(&self) -> bool {
        match self {
            BrokerError::ChannelClosed(_) | BrokerError::ConnectionClosed(_) => true,
            BrokerError::ConnectionRefused(_) | BrokerError::NotConfirmed => false,
            BrokerError::Protocol { text, .. } | BrokerError::Other(text) => {
                text.to_ascii_lowercase().contains("channel closed")
            }
        }
    }
}

/// Kind of exchange to declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ExchangeKind {
    /// Routes on exact routing-key equality.
    Direct,
    /// Routes to every bound queue.
    Fanout,
    /// Routes on dotted routing-key patterns (`*` one word, `#` zero or more).
    #[default]
    Topic,
    /// Routes on message headers.
    Headers,
}

impl ExchangeKind {
    /// Returns the protocol name of the exchange kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence hint attached to published messages.
///
/// This is the single mapping from the numeric delivery-mode option to the
/// persistence flag handed to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum DeliveryMode {
    /// Delivery mode 1: the broker may keep the message in memory only.
    Transient = 1,
    /// Delivery mode 2: the broker persists the message to disk.
    #[default]
    Persistent = 2,
}

impl DeliveryMode {
    /// Returns the numeric delivery mode.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns the persistence flag for this delivery mode.
    pub fn is_persistent(self) -> bool {
        match self {
            DeliveryMode::Transient => false,
            DeliveryMode::Persistent => true,
        }
    }
}

impl TryFrom<u8> for DeliveryMode {
    type Error = u8;

    /// Converts a numeric delivery mode, returning the rejected value on failure.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DeliveryMode::Transient),
            2 => Ok(DeliveryMode::Persistent),
            other => Err(other),
        }
    }
}

/// Options for exchange declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOptions {
    /// Whether the exchange survives a broker restart.
    pub durable: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self { durable: true }
    }
}

/// Options for queue declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Whether the queue survives a broker restart.
    pub durable: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self { durable: true }
    }
}

/// Properties carried by a message, on publish and on delivery.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageProperties {
    /// Whether the broker should persist the message.
    pub persistent: bool,
    /// MIME content type of the body.
    pub content_type: Option<String>,
    /// Application headers.
    pub headers: BTreeMap<String, String>,
}

/// A message handed to a consumer by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge this delivery.
    pub delivery_tag: u64,
    /// Tag of the consumer the message was delivered to.
    pub consumer_tag: String,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Set by the broker when the message was delivered before and requeued.
    pub redelivered: bool,
    /// Raw message body.
    pub body: Vec<u8>,
    /// Message properties.
    pub properties: MessageProperties,
}

/// Observer for asynchronous closure of a connection or channel.
///
/// Receives the failure that caused the closure, or `None` for a clean close.
pub type CloseObserver = Box<dyn Fn(Option<BrokerError>) + Send + Sync>;

/// Observer for asynchronous errors on a connection or channel.
pub type ErrorObserver = Box<dyn Fn(&BrokerError) + Send + Sync>;

/// Callback registered with [`BrokerChannel::consume`].
///
/// The broker client awaits the returned future before handing the next
/// delivery of the same channel to the callback.
pub type DeliveryHandler = Arc<dyn Fn(Delivery) -> BoxFuture<'static, ()> + Send + Sync>;

/// Entry point of the broker client library.
pub trait Broker: Send + Sync + 'static {
    /// Opens a new physical connection.
    fn connect<'a>(
        &'a self,
        options: &'a ConnectionOptions,
    ) -> BoxFuture<'a, Result<Arc<dyn BrokerConnection>, BrokerError>>;
}

/// A physical connection to the broker.
pub trait BrokerConnection: Send + Sync {
    /// Opens a plain channel.
    fn create_channel(&self) -> BoxFuture<'_, Result<Arc<dyn BrokerChannel>, BrokerError>>;

    /// Opens a channel in publisher-confirm mode.
    fn create_confirm_channel(&self)
        -> BoxFuture<'_, Result<Arc<dyn BrokerChannel>, BrokerError>>;

    /// Registers an observer invoked once when the connection closes.
    ///
    /// Registering on an already closed connection invokes the observer immediately.
    fn on_close(&self, observer: CloseObserver);

    /// Registers an observer invoked for every asynchronous connection error.
    fn on_error(&self, observer: ErrorObserver);

    /// Closes the connection and every channel on it.
    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// A logical channel multiplexed over a connection.
pub trait BrokerChannel: Send + Sync {
    /// Declares an exchange, idempotently.
    fn assert_exchange<'a>(
        &'a self,
        name: &'a str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Declares a queue, idempotently.
    fn assert_queue<'a>(
        &'a self,
        name: &'a str,
        options: QueueOptions,
    ) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Binds a queue to an exchange with a routing pattern.
    fn bind_queue<'a>(
        &'a self,
        queue: &'a str,
        exchange: &'a str,
        pattern: &'a str,
    ) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Caps the number of unacknowledged deliveries on this channel.
    fn prefetch(&self, count: u16) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Starts consuming a queue and returns the consumer tag.
    fn consume<'a>(
        &'a self,
        queue: &'a str,
        handler: DeliveryHandler,
    ) -> BoxFuture<'a, Result<String, BrokerError>>;

    /// Cancels a consumer.
    fn cancel<'a>(&'a self, consumer_tag: &'a str) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Acknowledges a delivery.
    fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Negatively acknowledges a delivery, optionally requeueing it.
    fn nack(&self, delivery: &Delivery, multiple: bool, requeue: bool) -> Result<(), BrokerError>;

    /// Publishes a message.
    ///
    /// On a confirm channel the future resolves once the broker confirms the
    /// message; on a plain channel it resolves once the message is written.
    fn publish<'a>(
        &'a self,
        exchange: &'a str,
        routing_key: &'a str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Registers an observer invoked once when the channel closes.
    ///
    /// Registering on an already closed channel invokes the observer immediately.
    fn on_close(&self, observer: CloseObserver);

    /// Registers an observer invoked for every asynchronous channel error.
    fn on_error(&self, observer: ErrorObserver);

    /// Closes the channel.
    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}
