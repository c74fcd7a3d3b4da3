use crate::config::ProducerConfig;
use crate::error::ClientError;
use crate::events::ClientEvent;
use amqp_resilience_connection::{ConnectionManager, ReconnectSubscription};
use amqp_resilience_core::{
    lock, BrokerChannel, BrokerError, ChannelSlot, DeliveryMode, ErrorLogLimiter,
    ExchangeOptions, MessageProperties, MetricsCollector, MetricsSnapshot, QueueOptions,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Per-message overrides of the producer defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOverrides {
    /// Content type instead of the configured one.
    pub content_type: Option<String>,
    /// Delivery mode instead of the configured one.
    pub delivery_mode: Option<DeliveryMode>,
    /// Application headers.
    pub headers: BTreeMap<String, String>,
}

impl PublishOverrides {
    /// Overrides the content type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Overrides the delivery mode.
    pub fn delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = Some(mode);
        self
    }

    /// Adds an application header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

struct Inner {
    manager: ConnectionManager,
    config: ProducerConfig,
    channel: ChannelSlot,
    metrics: MetricsCollector,
    limiter: ErrorLogLimiter,
    subscription: Mutex<Option<ReconnectSubscription>>,
    // Serializes recovery and close.
    operation: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

/// Publisher that keeps its confirm channel and topology across reconnects.
///
/// Publishing never waits for a reconnect: with no open channel it fails
/// immediately with [`ClientError::NotReady`].
#[derive(Clone)]
pub struct Producer {
    inner: Arc<Inner>,
}

impl Producer {
    /// Opens a confirm channel, declares topology and subscribes to reconnects.
    ///
    /// Fails with [`ClientError::NotReady`] if `manager` is not connected.
    pub async fn new(manager: &ConnectionManager, config: ProducerConfig) -> Result<Self, ClientError> {
        let inner = Arc::new(Inner {
            manager: manager.clone(),
            limiter: config.limiter(),
            config,
            channel: ChannelSlot::new(),
            metrics: manager.metrics_collector().clone(),
            subscription: Mutex::new(None),
            operation: tokio::sync::Mutex::new(()),
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

        tracing::info!(
            producer = %inner.config.name,
            exchange = inner.config.exchange.as_deref().unwrap_or(""),
            "producer ready"
        );
        Ok(Self { inner })
    }

    /// Returns the producer name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Returns true while a channel is open.
    pub fn is_ready(&self) -> bool {
        self.inner.channel.is_open()
    }

    /// Publishes `body` with the configured defaults and waits for the confirm.
    pub async fn publish(&self, routing_key: &str, body: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        self.publish_with(routing_key, body, PublishOverrides::default())
            .await
    }

    /// Encodes `message` as JSON and publishes it as `application/json`.
    pub async fn publish_json<T>(&self, routing_key: &str, message: &T) -> Result<(), ClientError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(message)?;
        self.publish_with(
            routing_key,
            body,
            PublishOverrides::default().content_type("application/json"),
        )
        .await
    }

    /// Publishes `body`, overriding the configured defaults where set.
    pub async fn publish_with(
        &self,
        routing_key: &str,
        body: impl Into<Vec<u8>>,
        overrides: PublishOverrides,
    ) -> Result<(), ClientError> {
        let inner = &self.inner;
        let Some(channel) = inner.channel.get() else {
            inner.publish_failed(routing_key, "channel is not ready");
            return Err(ClientError::NotReady);
        };

        let properties = MessageProperties {
            persistent: overrides
                .delivery_mode
                .unwrap_or(inner.config.delivery_mode)
                .is_persistent(),
            content_type: Some(
                overrides
                    .content_type
                    .unwrap_or_else(|| inner.config.content_type.clone()),
            ),
            headers: overrides.headers,
        };
        let exchange = inner.config.exchange.as_deref().unwrap_or("");

        match channel
            .publish(exchange, routing_key, body.into(), properties)
            .await
        {
            Ok(()) => {
                inner.metrics.record_message_published();
                tracing::trace!(producer = %inner.config.name, exchange, routing_key, "message published");
                inner.emit(ClientEvent::Published {
                    component_name: inner.config.name.clone(),
                    timestamp: Instant::now(),
                    routing_key: routing_key.to_string(),
                });
                Ok(())
            }
            Err(error) => {
                inner.publish_failed(routing_key, &error.to_string());
                Err(ClientError::PublishFailed(error))
            }
        }
    }

    /// Returns a snapshot of the connection metrics this producer records into.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Unsubscribes from reconnects and closes the channel.
    ///
    /// Waits for a recovery already in progress, so no channel is opened
    /// after this returns. Closing is best effort; failures are logged.
    pub async fn close(&self) {
        lock(&self.inner.subscription).take();
        let _operation = self.inner.operation.lock().await;
        self.inner.closed.store(true, Ordering::Release);
        if let Some(channel) = self.inner.channel.take() {
            if let Err(error) = channel.close().await {
                tracing::debug!(producer = %self.inner.config.name, error = %error, "error closing producer channel");
            }
        }
        self.inner.limiter.flush(&self.inner.config.name);
        tracing::info!(producer = %self.inner.config.name, "producer closed");
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("name", &self.inner.config.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        self.config.event_listeners.emit(&event);
    }

    async fn setup(self: &Arc<Self>) -> Result<(), ClientError> {
        let channel = self
            .manager
            .create_confirm_channel()
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
        }
        if let Some(queue) = &config.queue {
            channel
                .assert_queue(
                    queue,
                    QueueOptions {
                        durable: config.durable,
                    },
                )
                .await?;
            if let Some(exchange) = &config.exchange {
                channel
                    .bind_queue(queue, exchange, &config.routing_pattern)
                    .await?;
            }
        }
        Ok(())
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

        tracing::info!(producer = %self.config.name, "producer recovered");
        self.emit(ClientEvent::Recovered {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
        });
        Ok(())
    }

    fn channel_closed(&self, reason: Option<BrokerError>) {
        let reason = reason.map(|error| error.to_string());
        tracing::warn!(
            producer = %self.config.name,
            reason = reason.as_deref().unwrap_or("none"),
            "producer channel closed"
        );
        self.emit(ClientEvent::ChannelClosed {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            reason,
        });
    }

    fn publish_failed(&self, routing_key: &str, error: &str) {
        self.metrics.record_publish_failure();
        if self.limiter.should_log(&self.config.name) {
            tracing::warn!(
                producer = %self.config.name,
                routing_key,
                error,
                "failed to publish message"
            );
        }
        self.emit(ClientEvent::PublishFailed {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            routing_key: routing_key.to_string(),
            error: error.to_string(),
        });
    }
}
