use crate::config::BridgeConfig;
use crate::error::{BridgeError, Side};
use crate::events::BridgeEvent;
use crate::forward::FailureAction;
use crate::metrics::{BridgeMetrics, BridgeMetricsSnapshot};
use amqp_resilience_connection::{ConnectionManager, ReconnectSubscription};
use amqp_resilience_core::{
    lock, BrokerChannel, BrokerError, ChannelSlot, Delivery, DeliveryHandler, ErrorLogLimiter,
    ExchangeOptions, MessageProperties, QueueOptions,
};
use futures::FutureExt;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

/// Binding pattern of every source queue.
const CATCH_ALL: &str = "#";

struct Inner {
    source: ConnectionManager,
    target: ConnectionManager,
    config: BridgeConfig,
    source_channel: ChannelSlot,
    target_channel: ChannelSlot,
    consumer_tags: Mutex<Vec<String>>,
    running: AtomicBool,
    // Set by start, cleared by stop; reconnects restart only while set.
    wanted: AtomicBool,
    // Deliveries left unacknowledged because the target channel was gone.
    stranded: AtomicU64,
    operation: tokio::sync::Mutex<()>,
    metrics: BridgeMetrics,
    error_limiter: ErrorLogLimiter,
    drop_limiter: ErrorLogLimiter,
    subscriptions: Mutex<Vec<ReconnectSubscription>>,
}

/// Forwards messages from exchanges on a source broker to the same
/// exchanges on a target broker.
///
/// For every configured exchange the bridge consumes a durable source queue
/// bound with `#` and republishes each message, body untouched, to the same
/// exchange and routing key on the target. The source message is acked only
/// after the target confirms the publish.
///
/// When a forward fails because the target channel is closed the message is
/// neither acked nor nacked; the source channel is recycled on the next
/// start so the broker redelivers it. Any other failure nacks the message,
/// requeueing it only on its first delivery.
///
/// The bridge subscribes to reconnects of both managers and restarts itself
/// after either one reconnects, as long as it was started and not stopped.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl Bridge {
    /// Creates a stopped bridge and subscribes to reconnects of both managers.
    pub fn new(source: &ConnectionManager, target: &ConnectionManager, config: BridgeConfig) -> Self {
        let inner = Arc::new(Inner {
            source: source.clone(),
            target: target.clone(),
            metrics: BridgeMetrics::new(&config.name),
            error_limiter: config.limiter(),
            drop_limiter: config.limiter(),
            config,
            source_channel: ChannelSlot::new(),
            target_channel: ChannelSlot::new(),
            consumer_tags: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            wanted: AtomicBool::new(false),
            stranded: AtomicU64::new(0),
            operation: tokio::sync::Mutex::new(()),
            subscriptions: Mutex::new(Vec::new()),
        });

        let subscriptions = [(source, Side::Source), (target, Side::Target)]
            .into_iter()
            .map(|(manager, side)| {
                let weak = Arc::downgrade(&inner);
                manager.on_reconnect(move || {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(inner) => inner.reconnected(side).await,
                            None => Ok(()),
                        }
                    }
                })
            })
            .collect();
        *lock(&inner.subscriptions) = subscriptions;

        Self { inner }
    }

    /// Returns the bridge name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Returns true while forwarding.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Returns the consumer tags registered on the source, one per exchange.
    pub fn consumer_tags(&self) -> Vec<String> {
        lock(&self.inner.consumer_tags).clone()
    }

    /// Returns how many deliveries await redelivery after a target channel loss.
    pub fn stranded(&self) -> u64 {
        self.inner.stranded.load(Ordering::Acquire)
    }

    /// Starts forwarding.
    ///
    /// Both managers must be connected. Channels that are still open are
    /// reused, so calling this while running only re-declares topology.
    /// Whatever the outcome, the bridge restarts after later reconnects
    /// until [`Bridge::stop`] is called.
    pub async fn start(&self) -> Result<(), BridgeError> {
        self.inner.wanted.store(true, Ordering::Release);
        let _operation = self.inner.operation.lock().await;
        self.inner.start().await
    }

    /// Stops forwarding and closes both channels.
    ///
    /// Never fails; teardown errors are logged, as is the count of failure
    /// logs suppressed in the current window.
    pub async fn stop(&self) {
        self.inner.wanted.store(false, Ordering::Release);
        let _operation = self.inner.operation.lock().await;
        self.inner.halt().await;
        self.inner.error_limiter.flush(&self.inner.config.name);
        self.inner.drop_limiter.flush(&self.inner.config.name);
    }

    /// Unsubscribes from both managers and stops.
    pub async fn close(&self) {
        lock(&self.inner.subscriptions).clear();
        self.stop().await;
    }

    /// Returns a snapshot of the bridge counters.
    pub fn metrics(&self) -> BridgeMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Resets every counter to zero.
    pub fn reset_metrics(&self) {
        self.inner.metrics.reset();
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("name", &self.inner.config.name)
            .field("exchanges", &self.inner.config.exchanges)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Inner {
    fn emit(&self, event: BridgeEvent) {
        self.config.event_listeners.emit(&event);
    }

    /// Callers hold the operation lock.
    async fn start(self: &Arc<Self>) -> Result<(), BridgeError> {
        if !self.source.is_connected() {
            return Err(BridgeError::NotConnected { side: Side::Source });
        }
        if !self.target.is_connected() {
            return Err(BridgeError::NotConnected { side: Side::Target });
        }

        self.return_stranded().await;

        let source = match self.source_channel.get() {
            Some(channel) => channel,
            None => self.open_source().await?,
        };
        let target = match self.target_channel.get() {
            Some(channel) => channel,
            None => self.open_target().await?,
        };

        let config = &self.config;
        let exchange_options = ExchangeOptions {
            durable: config.durable,
        };
        for exchange in &config.exchanges {
            source
                .assert_exchange(exchange, config.exchange_kind, exchange_options)
                .await?;
            target
                .assert_exchange(exchange, config.exchange_kind, exchange_options)
                .await?;

            let queue = config.queue_name(exchange);
            source
                .assert_queue(
                    &queue,
                    QueueOptions {
                        durable: config.durable,
                    },
                )
                .await?;
            source.bind_queue(&queue, exchange, CATCH_ALL).await?;
        }

        if lock(&self.consumer_tags).is_empty() {
            let mut tags = Vec::with_capacity(config.exchanges.len());
            for exchange in &config.exchanges {
                let queue = config.queue_name(exchange);
                let tag = source.consume(&queue, self.delivery_handler(&source)).await?;
                tags.push(tag);
            }
            *lock(&self.consumer_tags) = tags;
        }

        if !self.running.swap(true, Ordering::AcqRel) {
            tracing::info!(
                bridge = %config.name,
                exchanges = ?config.exchanges,
                "bridge started"
            );
            self.emit(BridgeEvent::Started {
                component_name: config.name.clone(),
                timestamp: Instant::now(),
                exchanges: config.exchanges.clone(),
            });
        }
        Ok(())
    }

    async fn open_source(self: &Arc<Self>) -> Result<Arc<dyn BrokerChannel>, BridgeError> {
        let channel = self
            .source
            .create_channel()
            .await?
            .ok_or(BridgeError::NotConnected { side: Side::Source })?;
        if let Err(error) = channel.prefetch(self.config.prefetch).await {
            let _ = channel.close().await;
            return Err(error.into());
        }

        let weak = Arc::downgrade(self);
        self.source_channel
            .install(Arc::clone(&channel), move |reason| {
                if let Some(inner) = weak.upgrade() {
                    inner.channel_closed(Side::Source, reason);
                }
            });
        Ok(channel)
    }

    async fn open_target(self: &Arc<Self>) -> Result<Arc<dyn BrokerChannel>, BridgeError> {
        let channel = self
            .target
            .create_confirm_channel()
            .await?
            .ok_or(BridgeError::NotConnected { side: Side::Target })?;

        let weak = Arc::downgrade(self);
        self.target_channel
            .install(Arc::clone(&channel), move |reason| {
                if let Some(inner) = weak.upgrade() {
                    inner.channel_closed(Side::Target, reason);
                }
            });
        Ok(channel)
    }

    /// Closes the source channel if deliveries were stranded on it, which
    /// makes the broker requeue them.
    async fn return_stranded(&self) {
        let count = self.stranded.swap(0, Ordering::AcqRel);
        if count == 0 {
            return;
        }
        let Some(channel) = self.source_channel.take() else {
            return;
        };
        lock(&self.consumer_tags).clear();
        if let Err(error) = channel.close().await {
            tracing::debug!(bridge = %self.config.name, error = %error, "error closing source channel");
        }

        tracing::info!(
            bridge = %self.config.name,
            count,
            "recycled source channel to return stranded messages"
        );
        self.emit(BridgeEvent::StrandedReturned {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            count,
        });
    }

    fn delivery_handler(self: &Arc<Self>, source: &Arc<dyn BrokerChannel>) -> DeliveryHandler {
        let inner: Weak<Self> = Arc::downgrade(self);
        let source: Weak<dyn BrokerChannel> = Arc::downgrade(source);
        Arc::new(move |delivery| {
            let inner = inner.clone();
            let source = source.clone();
            async move {
                if let (Some(inner), Some(source)) = (inner.upgrade(), source.upgrade()) {
                    inner.forward(&*source, delivery).await;
                }
            }
            .boxed()
        })
    }

    async fn forward(&self, source: &dyn BrokerChannel, delivery: Delivery) {
        let properties = MessageProperties {
            persistent: self.config.delivery_mode.is_persistent(),
            content_type: Some(
                delivery
                    .properties
                    .content_type
                    .clone()
                    .unwrap_or_else(|| self.config.content_type.clone()),
            ),
            headers: delivery.properties.headers.clone(),
        };

        let result = match self.target_channel.get() {
            Some(target) => {
                target
                    .publish(
                        &delivery.exchange,
                        &delivery.routing_key,
                        delivery.body.clone(),
                        properties,
                    )
                    .await
            }
            None => Err(BrokerError::ChannelClosed(
                "target channel is not open".to_string(),
            )),
        };

        match result {
            Ok(()) => self.forwarded(source, &delivery),
            Err(error) => self.forward_failed(source, &delivery, error),
        }
    }

    fn forwarded(&self, source: &dyn BrokerChannel, delivery: &Delivery) {
        if let Err(error) = source.ack(delivery) {
            tracing::warn!(
                bridge = %self.config.name,
                exchange = %delivery.exchange,
                routing_key = %delivery.routing_key,
                error = %error,
                "failed to acknowledge forwarded message"
            );
        }

        let forwarded = self.metrics.record_forwarded();
        let log_every = self.config.log_every;
        if log_every > 0 && forwarded % log_every == 0 {
            tracing::info!(bridge = %self.config.name, forwarded, "bridge progress");
            self.emit(BridgeEvent::Progress {
                component_name: self.config.name.clone(),
                timestamp: Instant::now(),
                forwarded,
            });
        }
    }

    fn forward_failed(&self, source: &dyn BrokerChannel, delivery: &Delivery, error: BrokerError) {
        self.metrics.record_failed();
        let action = FailureAction::classify(&error, delivery.redelivered, self.config.detection);

        match action {
            FailureAction::Strand => {
                self.stranded.fetch_add(1, Ordering::AcqRel);
                if self.error_limiter.should_log(&self.config.name) {
                    tracing::warn!(
                        bridge = %self.config.name,
                        exchange = %delivery.exchange,
                        routing_key = %delivery.routing_key,
                        error = %error,
                        "target channel closed, leaving message for redelivery"
                    );
                }
            }
            FailureAction::Requeue | FailureAction::Drop => {
                let requeue = action == FailureAction::Requeue;
                if let Err(nack_error) = source.nack(delivery, false, requeue) {
                    tracing::debug!(bridge = %self.config.name, error = %nack_error, "nack failed");
                }
                if self.error_limiter.should_log(&self.config.name) {
                    tracing::error!(
                        bridge = %self.config.name,
                        exchange = %delivery.exchange,
                        routing_key = %delivery.routing_key,
                        requeue,
                        error = %error,
                        "failed to forward message"
                    );
                }
                if !requeue {
                    self.metrics.record_dropped();
                    if self.drop_limiter.should_log(&self.config.name) {
                        tracing::warn!(
                            bridge = %self.config.name,
                            exchange = %delivery.exchange,
                            routing_key = %delivery.routing_key,
                            "dropping message after repeated forwarding failure"
                        );
                    }
                }
            }
        }

        self.emit(BridgeEvent::ForwardFailed {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            exchange: delivery.exchange.clone(),
            routing_key: delivery.routing_key.clone(),
            action,
            error: error.to_string(),
        });
    }

    /// Callers hold the operation lock.
    async fn halt(&self) {
        let tags = std::mem::take(&mut *lock(&self.consumer_tags));
        if let Some(source) = self.source_channel.take() {
            for tag in &tags {
                if let Err(error) = source.cancel(tag).await {
                    tracing::debug!(bridge = %self.config.name, consumer_tag = %tag, error = %error, "failed to cancel consumer");
                }
            }
            if let Err(error) = source.close().await {
                tracing::debug!(bridge = %self.config.name, error = %error, "error closing source channel");
            }
        }
        if let Some(target) = self.target_channel.take() {
            if let Err(error) = target.close().await {
                tracing::debug!(bridge = %self.config.name, error = %error, "error closing target channel");
            }
        }
        // Closing the source channel returned anything stranded on it.
        self.stranded.store(0, Ordering::Release);
        self.running.store(false, Ordering::Release);

        tracing::info!(bridge = %self.config.name, "bridge stopped");
        self.emit(BridgeEvent::Stopped {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
        });
    }

    async fn reconnected(self: Arc<Self>, side: Side) -> Result<(), BridgeError> {
        let _operation = self.operation.lock().await;

        // A channel of the previous connection may outlive its close notice.
        let slot = match side {
            Side::Source => &self.source_channel,
            Side::Target => &self.target_channel,
        };
        if let Some(stale) = slot.take() {
            if side == Side::Source {
                lock(&self.consumer_tags).clear();
                self.stranded.store(0, Ordering::Release);
            }
            self.running.store(false, Ordering::Release);
            let _ = stale.close().await;
        }

        if !self.wanted.load(Ordering::Acquire) {
            return Ok(());
        }

        match self.start().await {
            Err(BridgeError::NotConnected { side: waiting }) => {
                tracing::debug!(
                    bridge = %self.config.name,
                    reconnected = %side,
                    waiting = %waiting,
                    "bridge restart deferred"
                );
                Ok(())
            }
            other => other,
        }
    }

    fn channel_closed(&self, side: Side, reason: Option<BrokerError>) {
        if side == Side::Source {
            lock(&self.consumer_tags).clear();
            // The broker requeued everything unacknowledged on this channel.
            self.stranded.store(0, Ordering::Release);
        }
        self.running.store(false, Ordering::Release);

        let reason = reason.map(|error| error.to_string());
        tracing::warn!(
            bridge = %self.config.name,
            side = %side,
            reason = reason.as_deref().unwrap_or("none"),
            "bridge channel closed"
        );
        self.emit(BridgeEvent::ChannelClosed {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            side,
            reason,
        });
    }
}
