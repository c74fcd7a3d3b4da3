use crate::error::ClientError;
use crate::events::ClientEvent;
use amqp_resilience_core::limiter::{DEFAULT_BURST, DEFAULT_WINDOW};
use amqp_resilience_core::{
    BoxError, Delivery, DeliveryMode, ErrorLogLimiter, EventListeners, ExchangeKind, FnListener,
};
use std::sync::Arc;
use std::time::Duration;

/// Callback for deliveries whose handler failed.
pub type ErrorCallback = Arc<dyn Fn(&BoxError, &Delivery) + Send + Sync>;

/// Configuration of a [`Producer`](crate::Producer).
#[derive(Clone)]
pub struct ProducerConfig {
    pub(crate) name: String,
    pub(crate) exchange: Option<String>,
    pub(crate) exchange_kind: ExchangeKind,
    pub(crate) durable: bool,
    pub(crate) delivery_mode: DeliveryMode,
    pub(crate) content_type: String,
    pub(crate) queue: Option<String>,
    pub(crate) routing_pattern: String,
    pub(crate) error_log_window: Duration,
    pub(crate) error_log_burst: u32,
    pub(crate) event_listeners: EventListeners<ClientEvent>,
}

impl ProducerConfig {
    /// Creates a new builder with default settings.
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::new()
    }

    /// Returns the producer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the exchange messages are published to, if any.
    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    /// Returns the delivery mode.
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode
    }

    /// Returns the default content type.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub(crate) fn limiter(&self) -> ErrorLogLimiter {
        ErrorLogLimiter::new(self.error_log_window, self.error_log_burst)
    }
}

impl std::fmt::Debug for ProducerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerConfig")
            .field("name", &self.name)
            .field("exchange", &self.exchange)
            .field("exchange_kind", &self.exchange_kind)
            .field("durable", &self.durable)
            .field("delivery_mode", &self.delivery_mode)
            .field("content_type", &self.content_type)
            .field("queue", &self.queue)
            .field("routing_pattern", &self.routing_pattern)
            .finish()
    }
}

/// Builder for [`ProducerConfig`].
pub struct ProducerConfigBuilder {
    name: String,
    exchange: Option<String>,
    exchange_kind: ExchangeKind,
    durable: bool,
    delivery_mode: u8,
    content_type: String,
    queue: Option<String>,
    routing_pattern: String,
    error_log_window: Duration,
    error_log_burst: u32,
    event_listeners: EventListeners<ClientEvent>,
}

impl ProducerConfigBuilder {
    /// Creates a new builder with default settings.
    ///
    /// Defaults: no exchange (publishes go to the default exchange), topic
    /// kind, durable, delivery mode 2 (persistent), `application/json`.
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            exchange: None,
            exchange_kind: ExchangeKind::Topic,
            durable: true,
            delivery_mode: DeliveryMode::Persistent.as_u8(),
            content_type: String::from("application/json"),
            queue: None,
            routing_pattern: String::from("#"),
            error_log_window: DEFAULT_WINDOW,
            error_log_burst: DEFAULT_BURST,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name used in logs and events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Publishes to `exchange`, declaring it on every (re)connect.
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Sets the exchange kind.
    ///
    /// Default: topic
    pub fn exchange_kind(mut self, kind: ExchangeKind) -> Self {
        self.exchange_kind = kind;
        self
    }

    /// Sets whether declared exchanges and queues survive a broker restart.
    ///
    /// Default: true
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Sets the numeric delivery mode: 1 is transient, 2 is persistent.
    ///
    /// Any other value is rejected by [`ProducerConfigBuilder::build`].
    pub fn delivery_mode(mut self, mode: u8) -> Self {
        self.delivery_mode = mode;
        self
    }

    /// Sets the content type sent with every message.
    ///
    /// Default: `application/json`
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Declares `queue` and binds it to the exchange with the routing pattern.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Sets the routing pattern used to bind the queue.
    ///
    /// Default: `#`
    pub fn routing_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.routing_pattern = pattern.into();
        self
    }

    /// Sets the window of the publish-failure log limiter.
    ///
    /// Default: 60 seconds
    pub fn error_log_window(mut self, window: Duration) -> Self {
        self.error_log_window = window;
        self
    }

    /// Sets how many publish failures are logged per window.
    ///
    /// Default: 10
    pub fn error_log_burst(mut self, burst: u32) -> Self {
        self.error_log_burst = burst;
        self
    }

    /// Registers a callback invoked when a publish fails.
    pub fn on_publish_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &ClientEvent| {
                if let ClientEvent::PublishFailed {
                    routing_key, error, ..
                } = event
                {
                    f(routing_key, error);
                }
            }));
        self
    }

    /// Registers a callback invoked for every event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Builds the configuration, validating the delivery mode.
    pub fn build(self) -> Result<ProducerConfig, ClientError> {
        let delivery_mode = DeliveryMode::try_from(self.delivery_mode).map_err(|mode| {
            ClientError::InvalidConfig(format!(
                "delivery mode must be 1 (transient) or 2 (persistent), got {}",
                mode
            ))
        })?;
        if self.exchange.as_deref() == Some("") {
            return Err(ClientError::InvalidConfig(
                "exchange name must not be empty".to_string(),
            ));
        }

        Ok(ProducerConfig {
            name: self.name,
            exchange: self.exchange,
            exchange_kind: self.exchange_kind,
            durable: self.durable,
            delivery_mode,
            content_type: self.content_type,
            queue: self.queue,
            routing_pattern: self.routing_pattern,
            error_log_window: self.error_log_window,
            error_log_burst: self.error_log_burst,
            event_listeners: self.event_listeners,
        })
    }
}

impl Default for ProducerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of a [`Consumer`](crate::Consumer).
#[derive(Clone)]
pub struct ConsumerConfig {
    pub(crate) name: String,
    pub(crate) queue: String,
    pub(crate) exchange: Option<String>,
    pub(crate) exchange_kind: ExchangeKind,
    pub(crate) routing_pattern: String,
    pub(crate) durable: bool,
    pub(crate) prefetch: u16,
    pub(crate) error_log_window: Duration,
    pub(crate) error_log_burst: u32,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) event_listeners: EventListeners<ClientEvent>,
}

impl ConsumerConfig {
    /// Creates a builder consuming `queue`.
    pub fn builder(queue: impl Into<String>) -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::new(queue)
    }

    /// Returns the consumer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the consumed queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Returns the prefetch count.
    pub fn prefetch(&self) -> u16 {
        self.prefetch
    }

    pub(crate) fn limiter(&self) -> ErrorLogLimiter {
        ErrorLogLimiter::new(self.error_log_window, self.error_log_burst)
    }
}

impl std::fmt::Debug for ConsumerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("exchange", &self.exchange)
            .field("routing_pattern", &self.routing_pattern)
            .field("durable", &self.durable)
            .field("prefetch", &self.prefetch)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Builder for [`ConsumerConfig`].
pub struct ConsumerConfigBuilder {
    name: Option<String>,
    queue: String,
    exchange: Option<String>,
    exchange_kind: ExchangeKind,
    routing_pattern: String,
    durable: bool,
    prefetch: u16,
    error_log_window: Duration,
    error_log_burst: u32,
    on_error: Option<ErrorCallback>,
    event_listeners: EventListeners<ClientEvent>,
}

impl ConsumerConfigBuilder {
    /// Creates a builder consuming `queue`.
    ///
    /// Defaults: durable queue, prefetch 10, no exchange binding.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            name: None,
            queue: queue.into(),
            exchange: None,
            exchange_kind: ExchangeKind::Topic,
            routing_pattern: String::from("#"),
            durable: true,
            prefetch: 10,
            error_log_window: DEFAULT_WINDOW,
            error_log_burst: DEFAULT_BURST,
            on_error: None,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name used in logs and events. Defaults to the queue name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Binds the queue to `exchange`, declaring it on every (re)connect.
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Sets the exchange kind.
    ///
    /// Default: topic
    pub fn exchange_kind(mut self, kind: ExchangeKind) -> Self {
        self.exchange_kind = kind;
        self
    }

    /// Sets the binding pattern.
    ///
    /// Default: `#`
    pub fn routing_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.routing_pattern = pattern.into();
        self
    }

    /// Sets whether the queue and exchange survive a broker restart.
    ///
    /// Default: true
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Sets how many unacknowledged deliveries the broker sends ahead.
    ///
    /// Default: 10
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Sets the window of the handler-failure log limiter.
    ///
    /// Default: 60 seconds
    pub fn error_log_window(mut self, window: Duration) -> Self {
        self.error_log_window = window;
        self
    }

    /// Sets how many handler failures are logged per window.
    ///
    /// Default: 10
    pub fn error_log_burst(mut self, burst: u32) -> Self {
        self.error_log_burst = burst;
        self
    }

    /// Registers a callback invoked instead of logging when the handler fails.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&BoxError, &Delivery) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Registers a callback invoked each time consumption resumes after a reconnect.
    pub fn on_resumed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &ClientEvent| {
                if let ClientEvent::Resumed { consumer_tag, .. } = event {
                    f(consumer_tag);
                }
            }));
        self
    }

    /// Registers a callback invoked for every event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<ConsumerConfig, ClientError> {
        if self.queue.is_empty() {
            return Err(ClientError::InvalidConfig(
                "queue name must not be empty".to_string(),
            ));
        }
        if self.exchange.as_deref() == Some("") {
            return Err(ClientError::InvalidConfig(
                "exchange name must not be empty".to_string(),
            ));
        }

        Ok(ConsumerConfig {
            name: self.name.unwrap_or_else(|| self.queue.clone()),
            queue: self.queue,
            exchange: self.exchange,
            exchange_kind: self.exchange_kind,
            routing_pattern: self.routing_pattern,
            durable: self.durable,
            prefetch: self.prefetch,
            error_log_window: self.error_log_window,
            error_log_burst: self.error_log_burst,
            on_error: self.on_error,
            event_listeners: self.event_listeners,
        })
    }
}
