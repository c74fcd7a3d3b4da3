use crate::config::ConsumerConfig;
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::lifecycle::ConsumerLifecycle;
use amqp_resilience_connection::{ConnectionManager, ReconnectSubscription};
use amqp_resilience_core::{
    lock, BoxError, BrokerChannel, BrokerError, ChannelSlot, Delivery, DeliveryHandler,
    ErrorLogLimiter, ExchangeOptions, MetricsCollector, MetricsSnapshot, QueueOptions,
};
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};

type Handler = BoxCloneService<Delivery, (), BoxError>;

struct Inner {
    manager: ConnectionManager,
    config: ConsumerConfig,
    channel: ChannelSlot,
    lifecycle: Mutex<ConsumerLifecycle>,
    // Serializes start, stop and recovery.
    operation: tokio::sync::Mutex<()>,
    handler: Mutex<Handler>,
    metrics: MetricsCollector,
    limiter: ErrorLogLimiter,
    subscription: Mutex<Option<ReconnectSubscription>>,
    closed: AtomicBool,
}

/// Queue consumer that resumes on its own after reconnects.
///
/// Messages are handed to a [`tower::Service`]. A successful call acks the
/// message; a failed (or panicking) call nacks it, requeueing it only if it
/// was not delivered before, so every message is retried at most once.
///
/// # Examples
///
/// ```rust,no_run
/// use amqp_resilience_client::{Consumer, ConsumerConfig};
/// use amqp_resilience_core::{BoxError, Delivery};
/// # async fn example(manager: amqp_resilience_connection::ConnectionManager) -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConsumerConfig::builder("jobs")
///     .exchange("events")
///     .routing_pattern("job.*")
///     .prefetch(20)
///     .build()?;
///
/// let handler = tower::service_fn(|delivery: Delivery| async move {
///     println!("got {} bytes", delivery.body.len());
///     Ok::<_, BoxError>(())
/// });
///
/// let consumer = Consumer::new(&manager, config, handler).await?;
/// consumer.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<Inner>,
}

impl Consumer {
    /// Opens a channel, declares topology and subscribes to reconnects.
    ///
    /// Consumption does not begin until [`Consumer::start`]. Fails with
    /// [`ClientError::NotReady`] if `manager` is not connected.
    pub async fn new<S>(
        manager: &ConnectionManager,
        config: ConsumerConfig,
        handler: S,
    ) -> Result<Self, ClientError>
    where
        S: Service<Delivery, Response = ()> + Clone + Send + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        let handler: Handler = BoxCloneService::new(handler.map_err(Into::into));
        let inner = Arc::new(Inner {
            manager: manager.clone(),
            limiter: config.limiter(),
            config,
            channel: ChannelSlot::new(),
            lifecycle: Mutex::new(ConsumerLifecycle::Inactive),
            operation: tokio::sync::Mutex::new(()),
            handler: Mutex::new(handler),
            metrics: manager.metrics_collector().clone(),
            subscription: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        inner.setup().await?;

        let weak = Arc::downgrade(&inner);
        let subscription = manager.on_reconnect(move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.recover().await,
                    None => Ok(()),
                }
            }
        });
        *lock(&inner.subscription) = Some(subscription);

        Ok(Self { inner })
    }

    /// Returns the consumer name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Returns the current lifecycle state.
    pub fn lifecycle(&self) -> ConsumerLifecycle {
        lock(&self.inner.lifecycle).clone()
    }

    /// Returns true while consuming.
    pub fn is_active(&self) -> bool {
        lock(&self.inner.lifecycle).is_active()
    }

    /// Returns the broker-assigned tag while consuming.
    pub fn consumer_tag(&self) -> Option<String> {
        lock(&self.inner.lifecycle)
            .consumer_tag()
            .map(ToString::to_string)
    }

    /// Starts consuming.
    ///
    /// Does nothing but warn if already consuming. Without a channel the
    /// consumer is marked to resume on the next reconnect and
    /// [`ClientError::NotReady`] is returned.
    pub async fn start(&self) -> Result<(), ClientError> {
        let _operation = self.inner.operation.lock().await;
        if let Some(tag) = self.consumer_tag() {
            tracing::warn!(
                consumer = %self.inner.config.name,
                consumer_tag = %tag,
                "consumer already active"
            );
            return Ok(());
        }

        let consumer_tag = self.inner.begin_consuming().await?;
        tracing::info!(
            consumer = %self.inner.config.name,
            queue = %self.inner.config.queue,
            consumer_tag = %consumer_tag,
            "consumer started"
        );
        self.inner.emit(ClientEvent::Started {
            component_name: self.inner.config.name.clone(),
            timestamp: Instant::now(),
            consumer_tag,
        });
        Ok(())
    }

    /// Stops consuming. Later reconnects do not resume.
    ///
    /// Cancelling is best effort; failures are logged.
    pub async fn stop(&self) {
        let _operation = self.inner.operation.lock().await;
        self.inner.stop().await;
    }

    /// Unsubscribes from reconnects, stops consuming and closes the channel.
    pub async fn close(&self) {
        lock(&self.inner.subscription).take();
        let _operation = self.inner.operation.lock().await;
        self.inner.closed.store(true, Ordering::Release);
        self.inner.stop().await;
        if let Some(channel) = self.inner.channel.take() {
            if let Err(error) = channel.close().await {
                tracing::debug!(consumer = %self.inner.config.name, error = %error, "error closing consumer channel");
            }
        }
        self.inner.limiter.flush(&self.inner.config.name);
        tracing::info!(consumer = %self.inner.config.name, "consumer closed");
    }

    /// Returns a snapshot of the connection metrics this consumer records into.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("name", &self.inner.config.name)
            .field("queue", &self.inner.config.queue)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        self.config.event_listeners.emit(&event);
    }

    fn set_lifecycle(&self, lifecycle: ConsumerLifecycle) -> ConsumerLifecycle {
        std::mem::replace(&mut *lock(&self.lifecycle), lifecycle)
    }

    async fn setup(self: &Arc<Self>) -> Result<(), ClientError> {
        let channel = self
            .manager
            .create_channel()
            .await?
            .ok_or(ClientError::NotReady)?;

        if let Err(error) = self.declare(&*channel).await {
            let _ = channel.close().await;
            return Err(error.into());
        }

        let weak = Arc::downgrade(self);
        self.channel.install(channel, move |reason| {
            if let Some(inner) = weak.upgrade() {
                inner.channel_closed(reason);
            }
        });
        Ok(())
    }

    async fn declare(&self, channel: &dyn BrokerChannel) -> Result<(), BrokerError> {
        let config = &self.config;
        channel.prefetch(config.prefetch).await?;
        channel
            .assert_queue(
                &config.queue,
                QueueOptions {
                    durable: config.durable,
                },
            )
            .await?;
        if let Some(exchange) = &config.exchange {
            channel
                .assert_exchange(
                    exchange,
                    config.exchange_kind,
                    ExchangeOptions {
                        durable: config.durable,
                    },
                )
                .await?;
            channel
                .bind_queue(&config.queue, exchange, &config.routing_pattern)
                .await?;
        }
        Ok(())
    }

    /// Registers the delivery callback. Callers hold the operation lock.
    async fn begin_consuming(self: &Arc<Self>) -> Result<String, ClientError> {
        let Some(channel) = self.channel.get() else {
            self.set_lifecycle(ConsumerLifecycle::PendingResume);
            return Err(ClientError::NotReady);
        };

        let handler = self.delivery_handler(&channel);
        let consumer_tag = channel.consume(&self.config.queue, handler).await?;
        self.set_lifecycle(ConsumerLifecycle::Active {
            consumer_tag: consumer_tag.clone(),
        });
        Ok(consumer_tag)
    }

    fn delivery_handler(self: &Arc<Self>, channel: &Arc<dyn BrokerChannel>) -> DeliveryHandler {
        let inner: Weak<Self> = Arc::downgrade(self);
        let channel: Weak<dyn BrokerChannel> = Arc::downgrade(channel);
        Arc::new(move |delivery| {
            let inner = inner.clone();
            let channel = channel.clone();
            async move {
                if let (Some(inner), Some(channel)) = (inner.upgrade(), channel.upgrade()) {
                    inner.handle(&*channel, delivery).await;
                }
            }
            .boxed()
        })
    }

    async fn handle(&self, channel: &dyn BrokerChannel, delivery: Delivery) {
        let service = lock(&self.handler).clone();
        let outcome = AssertUnwindSafe(service.oneshot(delivery.clone()))
            .catch_unwind()
            .await;

        let error: BoxError = match outcome {
            Ok(Ok(())) => {
                match channel.ack(&delivery) {
                    Ok(()) => {
                        self.metrics.record_message_consumed();
                        self.emit(ClientEvent::MessageHandled {
                            component_name: self.config.name.clone(),
                            timestamp: Instant::now(),
                            delivery_tag: delivery.delivery_tag,
                        });
                    }
                    Err(error) => tracing::warn!(
                        consumer = %self.config.name,
                        delivery_tag = delivery.delivery_tag,
                        error = %error,
                        "failed to acknowledge message"
                    ),
                }
                return;
            }
            Ok(Err(error)) => error,
            Err(_) => "message handler panicked".into(),
        };

        self.metrics.record_consume_failure();
        let requeue = !delivery.redelivered;

        match &self.config.on_error {
            Some(on_error) => on_error(&error, &delivery),
            None => {
                if self.limiter.should_log(&self.config.name) {
                    tracing::error!(
                        consumer = %self.config.name,
                        routing_key = %delivery.routing_key,
                        redelivered = delivery.redelivered,
                        requeue,
                        error = %error,
                        "message handler failed"
                    );
                }
            }
        }
        self.emit(ClientEvent::HandlerFailed {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            delivery_tag: delivery.delivery_tag,
            requeue,
            error: error.to_string(),
        });

        // The channel is usually gone when this fails; the broker redelivers.
        if let Err(error) = channel.nack(&delivery, false, requeue) {
            tracing::debug!(consumer = %self.config.name, error = %error, "nack failed");
        }
    }

    async fn stop(&self) {
        let previous = self.set_lifecycle(ConsumerLifecycle::Inactive);
        let ConsumerLifecycle::Active { consumer_tag } = previous else {
            return;
        };

        if let Some(channel) = self.channel.get() {
            if let Err(error) = channel.cancel(&consumer_tag).await {
                tracing::warn!(
                    consumer = %self.config.name,
                    consumer_tag = %consumer_tag,
                    error = %error,
                    "failed to cancel consumer"
                );
            }
        }
        tracing::info!(consumer = %self.config.name, consumer_tag = %consumer_tag, "consumer stopped");
        self.emit(ClientEvent::Stopped {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
        });
    }

    async fn recover(self: Arc<Self>) -> Result<(), ClientError> {
        let _operation = self.operation.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(stale) = self.channel.take() {
            let _ = stale.close().await;
        }
        self.setup().await?;
        self.emit(ClientEvent::Recovered {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
        });

        if !lock(&self.lifecycle).resumes() {
            tracing::info!(consumer = %self.config.name, "consumer channel recovered");
            return Ok(());
        }

        let consumer_tag = self.begin_consuming().await?;
        tracing::info!(
            consumer = %self.config.name,
            consumer_tag = %consumer_tag,
            "consumer resumed"
        );
        self.emit(ClientEvent::Resumed {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            consumer_tag,
        });
        Ok(())
    }

    fn channel_closed(&self, reason: Option<BrokerError>) {
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.is_active() {
                *lifecycle = ConsumerLifecycle::PendingResume;
            }
        }

        let reason = reason.map(|error| error.to_string());
        tracing::warn!(
            consumer = %self.config.name,
            reason = reason.as_deref().unwrap_or("none"),
            "consumer channel closed"
        );
        self.emit(ClientEvent::ChannelClosed {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            reason,
        });
    }
}
