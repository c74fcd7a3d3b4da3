use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::events::ConnectionEvent;
use crate::subscribers::{ReconnectSubscribers, ReconnectSubscription, Subscriber};
use amqp_resilience_core::{
    lock, BoxError, Broker, BrokerChannel, BrokerConnection, BrokerError, ConnectionState,
    MetricsCollector, MetricsSnapshot,
};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Default)]
struct Link {
    connection: Option<Arc<dyn BrokerConnection>>,
    // Bumped whenever a connection is installed or taken; close notifications
    // carrying an older generation are stale.
    generation: u64,
    established: bool,
}

struct Inner {
    broker: Arc<dyn Broker>,
    config: ConnectionConfig,
    link: Mutex<Link>,
    // Serializes reconnect loops: at most one runs per manager.
    connect_lock: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    state: watch::Sender<ConnectionState>,
    subscribers: Arc<ReconnectSubscribers>,
    metrics: MetricsCollector,
}

/// Owner of one self-healing broker connection.
///
/// The manager is cheap to clone; clones share the same connection,
/// subscribers and metrics.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager without connecting.
    ///
    /// Call [`ConnectionManager::start`] to run the initial connect loop.
    /// Registering reconnect subscribers before starting lets them observe
    /// the very first connection too.
    pub fn new(broker: Arc<dyn Broker>, config: ConnectionConfig) -> Self {
        let metrics = MetricsCollector::new(config.name.as_str());
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                broker,
                config,
                link: Mutex::new(Link::default()),
                connect_lock: tokio::sync::Mutex::new(()),
                shutdown,
                state,
                subscribers: Arc::new(ReconnectSubscribers::default()),
                metrics,
            }),
        }
    }

    /// Creates a manager and connects, retrying per the configured policy.
    ///
    /// Returns once connected, or with [`ConnectionError::RetriesExhausted`]
    /// if the retry cap is reached first.
    pub async fn connect(
        broker: Arc<dyn Broker>,
        config: ConnectionConfig,
    ) -> Result<Self, ConnectionError> {
        let manager = Self::new(broker, config);
        manager.start().await?;
        Ok(manager)
    }

    /// Runs the connect loop unless already connected.
    pub async fn start(&self) -> Result<(), ConnectionError> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.inner.is_shutdown() {
            return Err(ConnectionError::Shutdown);
        }
        if self.is_connected() {
            return Ok(());
        }
        self.inner.reconnect_loop().await
    }

    /// Returns the configured name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Returns true while a connection is established.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.link).established
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns true once [`ConnectionManager::close`] was called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// Returns the current connection, if established.
    pub fn connection(&self) -> Option<Arc<dyn BrokerConnection>> {
        self.inner.connection()
    }

    /// Opens a plain channel.
    ///
    /// Returns `Ok(None)` when not connected: callers wait for the next
    /// reconnect signal instead of treating it as a failure.
    pub async fn create_channel(&self) -> Result<Option<Arc<dyn BrokerChannel>>, BrokerError> {
        match self.connection() {
            Some(connection) => connection.create_channel().await.map(Some),
            None => Ok(None),
        }
    }

    /// Opens a channel in publisher-confirm mode.
    ///
    /// Returns `Ok(None)` when not connected.
    pub async fn create_confirm_channel(
        &self,
    ) -> Result<Option<Arc<dyn BrokerChannel>>, BrokerError> {
        match self.connection() {
            Some(connection) => connection.create_confirm_channel().await.map(Some),
            None => Ok(None),
        }
    }

    /// Registers a callback run after every successful (re)connection.
    ///
    /// Callbacks run one at a time in registration order. A failing or
    /// panicking callback is logged and does not stop the others.
    pub fn on_reconnect<F, Fut, E>(&self, f: F) -> ReconnectSubscription
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let subscriber: Subscriber = Arc::new(move || {
            let future = f();
            async move { future.await.map_err(Into::into) }.boxed()
        });
        let id = self.inner.subscribers.add(subscriber);
        ReconnectSubscription::new(id, &self.inner.subscribers)
    }

    /// Number of registered reconnect subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Waits until connected, for at most `timeout`.
    ///
    /// Returns whether the manager is connected.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.subscribe();
        let connected = tokio::time::timeout(timeout, state.wait_for(|s| s.is_connected()))
            .await
            .is_ok_and(|result| result.is_ok());
        connected && self.is_connected()
    }

    /// Returns a snapshot of the connection metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Returns the shared collector, for components built on this connection.
    pub fn metrics_collector(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    /// Shuts the manager down.
    ///
    /// No reconnect follows. Closing the physical connection is best effort:
    /// failures are logged. Calling this more than once is harmless.
    pub async fn close(&self) {
        self.inner.shutdown.send_replace(true);

        let connection = {
            let mut link = lock(&self.inner.link);
            link.generation += 1;
            link.established = false;
            link.connection.take()
        };
        self.inner.metrics.set_reconnect_attempt(0);
        self.inner.transition(ConnectionState::Disconnected);

        if let Some(connection) = connection {
            if let Err(error) = connection.close().await {
                tracing::warn!(
                    connection = %self.inner.config.name,
                    error = %error,
                    "error while closing broker connection"
                );
            }
            tracing::info!(connection = %self.inner.config.name, "broker connection closed");
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("name", &self.inner.config.name)
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Inner {
    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn connection(&self) -> Option<Arc<dyn BrokerConnection>> {
        let link = lock(&self.link);
        if link.established {
            link.connection.clone()
        } else {
            None
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        self.config.event_listeners.emit(&event);
    }

    fn transition(&self, to: ConnectionState) {
        let mut from = to;
        let changed = self.state.send_if_modified(|state| {
            if *state == to {
                return false;
            }
            from = std::mem::replace(state, to);
            true
        });
        if !changed {
            return;
        }

        self.metrics.set_connection_state(to);
        tracing::debug!(
            connection = %self.config.name,
            from = %from,
            to = %to,
            "connection state changed"
        );
        self.emit(ConnectionEvent::StateTransition {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            from,
            to,
        });
    }

    async fn reconnect_loop(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let name = self.config.name.as_str();
        let mut backoff = self.config.policy.backoff();

        loop {
            if self.is_shutdown() {
                self.transition(ConnectionState::Disconnected);
                return Err(ConnectionError::Shutdown);
            }

            let attempt = backoff.begin_attempt();
            self.metrics.set_reconnect_attempt(attempt);
            self.transition(ConnectionState::Connecting);
            self.emit(ConnectionEvent::Reconnecting {
                component_name: self.config.name.clone(),
                timestamp: Instant::now(),
                attempt,
            });
            tracing::info!(
                connection = name,
                attempt,
                host = %self.config.options.hostname,
                port = self.config.options.port,
                "connecting to broker"
            );

            let error = match self.broker.connect(&self.config.options).await {
                Ok(connection) if self.is_shutdown() => {
                    let _ = connection.close().await;
                    self.transition(ConnectionState::Disconnected);
                    return Err(ConnectionError::Shutdown);
                }
                Ok(connection) => match self.install(connection).await {
                    Ok(()) => {
                        self.connected(attempt).await;
                        return Ok(());
                    }
                    Err(error) => error,
                },
                Err(error) => error,
            };

            if self.config.policy.is_exhausted(attempt) {
                tracing::error!(
                    connection = name,
                    attempts = attempt,
                    error = %error,
                    "giving up on broker connection"
                );
                self.emit(ConnectionEvent::RetriesExhausted {
                    component_name: self.config.name.clone(),
                    timestamp: Instant::now(),
                    attempts: attempt,
                });
                self.metrics.set_reconnect_attempt(0);
                self.transition(ConnectionState::Disconnected);
                return Err(ConnectionError::RetriesExhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = backoff.next_delay();
            tracing::warn!(
                connection = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "broker connection attempt failed, retrying"
            );
            self.emit(ConnectionEvent::AttemptFailed {
                component_name: self.config.name.clone(),
                timestamp: Instant::now(),
                attempt,
                delay,
                error: error.to_string(),
            });
            self.transition(ConnectionState::Reconnecting);

            let mut shutdown = self.shutdown.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|closed| *closed) => {}
            }
        }
    }

    /// Installs a freshly opened connection and attaches its observers.
    ///
    /// Fails if the connection closed before the observers were in place.
    async fn install(self: &Arc<Self>, connection: Arc<dyn BrokerConnection>) -> Result<(), BrokerError> {
        let generation = {
            let mut link = lock(&self.link);
            link.generation += 1;
            link.established = false;
            link.connection = Some(Arc::clone(&connection));
            link.generation
        };

        let weak = Arc::downgrade(self);
        connection.on_error(Box::new(move |error| {
            if let Some(inner) = weak.upgrade() {
                tracing::warn!(
                    connection = %inner.config.name,
                    error = %error,
                    "broker connection error"
                );
            }
        }));

        let weak = Arc::downgrade(self);
        connection.on_close(Box::new(move |reason| {
            if let Some(inner) = weak.upgrade() {
                inner.connection_lost(generation, reason);
            }
        }));

        let installed = {
            let mut link = lock(&self.link);
            if link.generation == generation && link.connection.is_some() {
                link.established = true;
                true
            } else {
                false
            }
        };
        if installed {
            return Ok(());
        }

        // Closed while observers were attached; discard it.
        let _ = connection.close().await;
        Err(BrokerError::ConnectionClosed(
            "connection closed during setup".to_string(),
        ))
    }

    async fn connected(self: &Arc<Self>, attempt: u32) {
        self.metrics.set_reconnect_attempt(0);
        self.transition(ConnectionState::Connected);
        self.metrics.record_connection_established();
        tracing::info!(connection = %self.config.name, attempt, "connected to broker");
        self.emit(ConnectionEvent::Connected {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            attempt,
        });

        self.notify_subscribers().await;
    }

    async fn notify_subscribers(&self) {
        for (id, subscriber) in self.subscribers.snapshot() {
            if !self.subscribers.contains(id) {
                continue;
            }

            let outcome = AssertUnwindSafe(async move { subscriber().await })
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error.to_string(),
                Err(_) => "reconnect subscriber panicked".to_string(),
            };

            tracing::error!(
                connection = %self.config.name,
                subscriber = id,
                error = %error,
                "reconnect subscriber failed"
            );
            self.emit(ConnectionEvent::SubscriberFailed {
                component_name: self.config.name.clone(),
                timestamp: Instant::now(),
                error,
            });
        }
    }

    fn connection_lost(self: &Arc<Self>, generation: u64, reason: Option<BrokerError>) {
        let was_established = {
            let mut link = lock(&self.link);
            if link.generation != generation || link.connection.is_none() {
                return;
            }
            link.connection = None;
            std::mem::replace(&mut link.established, false)
        };
        if !was_established {
            // Still being installed; the connect loop notices on its own.
            return;
        }

        self.metrics.record_connection_lost();
        let reason = reason.map(|error| error.to_string());

        if self.is_shutdown() {
            self.transition(ConnectionState::Disconnected);
            return;
        }

        tracing::warn!(
            connection = %self.config.name,
            reason = reason.as_deref().unwrap_or("none"),
            "broker connection lost"
        );
        self.emit(ConnectionEvent::Disconnected {
            component_name: self.config.name.clone(),
            timestamp: Instant::now(),
            reason,
        });
        self.transition(ConnectionState::Reconnecting);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(Arc::clone(self).recover());
            }
            Err(_) => tracing::error!(
                connection = %self.config.name,
                "no tokio runtime available, cannot reconnect"
            ),
        }
    }

    async fn recover(self: Arc<Self>) {
        let _guard = self.connect_lock.lock().await;
        if self.is_shutdown() || lock(&self.link).established {
            return;
        }

        match self.reconnect_loop().await {
            Ok(()) => {}
            Err(ConnectionError::Shutdown) => {
                tracing::debug!(connection = %self.config.name, "reconnect stopped by shutdown");
            }
            Err(error) => {
                tracing::error!(
                    connection = %self.config.name,
                    error = %error,
                    "reconnect loop gave up"
                );
            }
        }
    }
}
