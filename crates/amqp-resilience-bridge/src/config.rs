use crate::error::BridgeError;
use crate::events::BridgeEvent;
use crate::forward::ChannelClosedDetection;
use amqp_resilience_core::limiter::{DEFAULT_BURST, DEFAULT_WINDOW};
use amqp_resilience_core::{DeliveryMode, ErrorLogLimiter, EventListeners, ExchangeKind, FnListener};
use std::time::Duration;

/// Configuration of a [`Bridge`](crate::Bridge).
#[derive(Clone)]
pub struct BridgeConfig {
    pub(crate) name: String,
    pub(crate) exchanges: Vec<String>,
    pub(crate) exchange_kind: ExchangeKind,
    pub(crate) durable: bool,
    pub(crate) delivery_mode: DeliveryMode,
    pub(crate) content_type: String,
    pub(crate) queue_prefix: String,
    pub(crate) prefetch: u16,
    pub(crate) log_every: u64,
    pub(crate) error_log_window: Duration,
    pub(crate) error_log_burst: u32,
    pub(crate) detection: ChannelClosedDetection,
    pub(crate) event_listeners: EventListeners<BridgeEvent>,
}

impl BridgeConfig {
    /// Creates a new builder with default settings.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
    }

    /// Returns the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the bridged exchanges.
    pub fn exchanges(&self) -> &[String] {
        &self.exchanges
    }

    /// Returns the source queue consumed for `exchange`.
    pub fn queue_name(&self, exchange: &str) -> String {
        format!("{}{}", self.queue_prefix, exchange)
    }

    /// Returns the content type given to forwarded messages that carry none.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Returns the prefetch count of the source channel.
    pub fn prefetch(&self) -> u16 {
        self.prefetch
    }

    /// Returns how many forwarded messages separate progress lines (0: never).
    pub fn log_every(&self) -> u64 {
        self.log_every
    }

    pub(crate) fn limiter(&self) -> ErrorLogLimiter {
        ErrorLogLimiter::new(self.error_log_window, self.error_log_burst)
    }
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("name", &self.name)
            .field("exchanges", &self.exchanges)
            .field("exchange_kind", &self.exchange_kind)
            .field("durable", &self.durable)
            .field("delivery_mode", &self.delivery_mode)
            .field("content_type", &self.content_type)
            .field("queue_prefix", &self.queue_prefix)
            .field("prefetch", &self.prefetch)
            .field("log_every", &self.log_every)
            .field("detection", &self.detection)
            .finish()
    }
}

/// Builder for [`BridgeConfig`].
pub struct BridgeConfigBuilder {
    name: String,
    exchanges: Vec<String>,
    exchange_kind: ExchangeKind,
    durable: bool,
    delivery_mode: u8,
    content_type: String,
    queue_prefix: String,
    prefetch: u16,
    log_every: u64,
    error_log_window: Duration,
    error_log_burst: u32,
    detection: ChannelClosedDetection,
    event_listeners: EventListeners<BridgeEvent>,
}

impl BridgeConfigBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            exchanges: Vec::new(),
            exchange_kind: ExchangeKind::Topic,
            durable: true,
            delivery_mode: DeliveryMode::Persistent.as_u8(),
            content_type: String::from("application/json"),
            queue_prefix: String::from("bridge_"),
            prefetch: 50,
            log_every: 100,
            error_log_window: DEFAULT_WINDOW,
            error_log_burst: DEFAULT_BURST,
            detection: ChannelClosedDetection::default(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name used in logs, events and metric labels.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds an exchange to bridge.
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchanges.push(exchange.into());
        self
    }

    /// Adds several exchanges to bridge.
    pub fn exchanges<I, S>(mut self, exchanges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exchanges.extend(exchanges.into_iter().map(Into::into));
        self
    }

    /// Sets the kind of the exchanges declared on both sides.
    ///
    /// Default: topic
    pub fn exchange_kind(mut self, kind: ExchangeKind) -> Self {
        self.exchange_kind = kind;
        self
    }

    /// Sets whether exchanges and source queues survive a broker restart.
    ///
    /// Default: true
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Sets the delivery mode of forwarded messages: 1 transient, 2 persistent.
    ///
    /// Any other value is rejected by [`build`](Self::build).
    ///
    /// Default: 2
    pub fn delivery_mode(mut self, mode: u8) -> Self {
        self.delivery_mode = mode;
        self
    }

    /// Sets the content type of forwarded messages whose source message has none.
    ///
    /// A content type set on the source message is forwarded unchanged.
    ///
    /// Default: `application/json`
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Sets the prefix of the source queue names.
    ///
    /// Default: `bridge_`
    pub fn queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.queue_prefix = prefix.into();
        self
    }

    /// Sets how many unacknowledged source deliveries the broker sends ahead.
    ///
    /// Default: 50
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Logs a progress line every `count` forwarded messages; 0 disables it.
    ///
    /// Default: 100
    pub fn log_every(mut self, count: u64) -> Self {
        self.log_every = count;
        self
    }

    /// Sets the window of the forwarding-failure log limiters.
    ///
    /// Default: 60 seconds
    pub fn error_log_window(mut self, window: Duration) -> Self {
        self.error_log_window = window;
        self
    }

    /// Sets how many forwarding failures are logged per window.
    ///
    /// Default: 10
    pub fn error_log_burst(mut self, burst: u32) -> Self {
        self.error_log_burst = burst;
        self
    }

    /// Sets how forwarding failures are recognised as a closed channel.
    ///
    /// Default: [`ChannelClosedDetection::Structured`]
    pub fn channel_closed_detection(mut self, detection: ChannelClosedDetection) -> Self {
        self.detection = detection;
        self
    }

    /// Registers a callback invoked when the bridge starts forwarding.
    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BridgeEvent| {
                if matches!(event, BridgeEvent::Started { .. }) {
                    f();
                }
            }));
        self
    }

    /// Registers a callback invoked when the bridge is stopped.
    pub fn on_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BridgeEvent| {
                if matches!(event, BridgeEvent::Stopped { .. }) {
                    f();
                }
            }));
        self
    }

    /// Registers a callback invoked with the forwarded count at each progress line.
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BridgeEvent| {
                if let BridgeEvent::Progress { forwarded, .. } = event {
                    f(*forwarded);
                }
            }));
        self
    }

    /// Registers a callback invoked for every event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<BridgeConfig, BridgeError> {
        let delivery_mode = DeliveryMode::try_from(self.delivery_mode)
            .map_err(|mode| {
                BridgeError::InvalidConfig(format!(
                    "delivery mode must be 1 (transient) or 2 (persistent), got {mode}"
                ))
            })?;
        if self.exchanges.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "at least one exchange is required".to_string(),
            ));
        }
        if self.exchanges.iter().any(String::is_empty) {
            return Err(BridgeError::InvalidConfig(
                "exchange name must not be empty".to_string(),
            ));
        }

        Ok(BridgeConfig {
            name: self.name,
            exchanges: self.exchanges,
            exchange_kind: self.exchange_kind,
            durable: self.durable,
            delivery_mode,
            content_type: self.content_type,
            queue_prefix: self.queue_prefix,
            prefetch: self.prefetch,
            log_every: self.log_every,
            error_log_window: self.error_log_window,
            error_log_burst: self.error_log_burst,
            detection: self.detection,
            event_listeners: self.event_listeners,
        })
    }
}

impl Default for BridgeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
