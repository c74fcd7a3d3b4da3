//! Connection and channel handles handed out by [`MemoryBroker`](crate::MemoryBroker).

use crate::state::{
    deliver, not_found, AckRecord, Binding, BrokerState, ChannelRecord, Consumer, Message,
    NackRecord, PublishedMessage,
};
use amqp_resilience_core::{
    lock, BrokerChannel, BrokerConnection, BrokerError, CloseObserver, Delivery, DeliveryHandler,
    ErrorObserver, ExchangeKind, ExchangeOptions, MessageProperties, QueueOptions,
};
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::{Arc, Mutex};

pub(crate) struct MemoryConnection {
    pub(crate) id: u64,
    pub(crate) state: Arc<Mutex<BrokerState>>,
}

impl MemoryConnection {
    fn open_channel(&self, confirm: bool) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let mut state = lock(&self.state);
        if !state.connections.get(&self.id).is_some_and(|c| c.open) {
            return Err(BrokerError::ConnectionClosed(format!(
                "connection {} is closed",
                self.id
            )));
        }
        let id = state.next_id();
        state.channels.insert(id, ChannelRecord::new(self.id, confirm));
        tracing::trace!(connection = self.id, channel = id, confirm, "channel opened");
        Ok(Arc::new(MemoryChannel {
            id,
            state: Arc::clone(&self.state),
        }))
    }

    fn open_channel_after_delay(
        &self,
        confirm: bool,
    ) -> BoxFuture<'_, Result<Arc<dyn BrokerChannel>, BrokerError>> {
        let delay = lock(&self.state).channel_delay;
        match delay {
            Some(delay) => async move {
                tokio::time::sleep(delay).await;
                self.open_channel(confirm)
            }
            .boxed(),
            None => future::ready(self.open_channel(confirm)).boxed(),
        }
    }
}

impl BrokerConnection for MemoryConnection {
    fn create_channel(&self) -> BoxFuture<'_, Result<Arc<dyn BrokerChannel>, BrokerError>> {
        self.open_channel_after_delay(false)
    }

    fn create_confirm_channel(
        &self,
    ) -> BoxFuture<'_, Result<Arc<dyn BrokerChannel>, BrokerError>> {
        self.open_channel_after_delay(true)
    }

    fn on_close(&self, observer: CloseObserver) {
        let observer = {
            let mut state = lock(&self.state);
            match state.connections.get_mut(&self.id) {
                Some(connection) if connection.open => {
                    connection.close_observers.push(observer);
                    None
                }
                _ => Some(observer),
            }
        };
        if let Some(observer) = observer {
            observer(None);
        }
    }

    fn on_error(&self, observer: ErrorObserver) {
        let mut state = lock(&self.state);
        if let Some(connection) = state.connections.get_mut(&self.id) {
            connection.error_observers.push(observer);
        }
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        let notices = lock(&self.state).close_connection(self.id, None);
        deliver(notices);
        future::ready(Ok(())).boxed()
    }
}

pub(crate) struct MemoryChannel {
    pub(crate) id: u64,
    pub(crate) state: Arc<Mutex<BrokerState>>,
}

impl MemoryChannel {
    fn with_open<R>(
        &self,
        f: impl FnOnce(&mut BrokerState) -> Result<R, BrokerError>,
    ) -> Result<R, BrokerError> {
        let mut state = lock(&self.state);
        state.open_channel(self.id)?;
        f(&mut *state)
    }

    fn settle(
        &self,
        delivery: &Delivery,
        requeue: Option<bool>,
    ) -> Result<(), BrokerError> {
        self.with_open(|state| {
            let channel = state.open_channel(self.id)?;
            let entry = channel
                .unacked
                .remove(&delivery.delivery_tag)
                .ok_or_else(|| BrokerError::Protocol {
                    code: 406,
                    text: format!(
                        "PRECONDITION_FAILED - unknown delivery tag {}",
                        delivery.delivery_tag
                    ),
                })?;

            match requeue {
                None => state.acks.push(AckRecord {
                    queue: entry.queue,
                    routing_key: entry.message.routing_key,
                    body: entry.message.body,
                }),
                Some(requeue) => {
                    state.nacks.push(NackRecord {
                        queue: entry.queue.clone(),
                        body: entry.message.body.clone(),
                        requeue,
                        redelivered: entry.message.redelivered,
                    });
                    if requeue {
                        if let Some(queue) = state.queues.get_mut(&entry.queue) {
                            let mut message = entry.message;
                            message.redelivered = true;
                            queue.messages.push_front(message);
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

impl BrokerChannel for MemoryChannel {
    fn assert_exchange<'a>(
        &'a self,
        name: &'a str,
        kind: ExchangeKind,
        _options: ExchangeOptions,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        let result = self.with_open(|state| match state.exchanges.get(name) {
            Some(existing) if *existing != kind => Err(BrokerError::Protocol {
                code: 406,
                text: format!(
                    "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}'",
                    name
                ),
            }),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), kind);
                Ok(())
            }
        });
        future::ready(result).boxed()
    }

    fn assert_queue<'a>(
        &'a self,
        name: &'a str,
        _options: QueueOptions,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        let result = self.with_open(|state| {
            state.queues.entry(name.to_string()).or_default();
            Ok(())
        });
        future::ready(result).boxed()
    }

    fn bind_queue<'a>(
        &'a self,
        queue: &'a str,
        exchange: &'a str,
        pattern: &'a str,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        let result = self.with_open(|state| {
            if !state.queues.contains_key(queue) {
                return Err(not_found("queue", queue));
            }
            if !state.exchanges.contains_key(exchange) {
                return Err(not_found("exchange", exchange));
            }
            let binding = Binding {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                pattern: pattern.to_string(),
            };
            if !state.bindings.contains(&binding) {
                state.bindings.push(binding);
            }
            Ok(())
        });
        future::ready(result).boxed()
    }

    fn prefetch(&self, count: u16) -> BoxFuture<'_, Result<(), BrokerError>> {
        let result = self.with_open(|state| {
            state.open_channel(self.id)?.prefetch = count;
            Ok(())
        });
        future::ready(result).boxed()
    }

    fn consume<'a>(
        &'a self,
        queue: &'a str,
        handler: DeliveryHandler,
    ) -> BoxFuture<'a, Result<String, BrokerError>> {
        let result = self.with_open(|state| {
            if !state.queues.contains_key(queue) {
                return Err(not_found("queue", queue));
            }
            let tag = state.next_consumer_tag();
            state.open_channel(self.id)?.consumers.push(Consumer {
                tag: tag.clone(),
                queue: queue.to_string(),
                handler,
            });
            Ok(tag)
        });
        future::ready(result).boxed()
    }

    fn cancel<'a>(&'a self, consumer_tag: &'a str) -> BoxFuture<'a, Result<(), BrokerError>> {
        let result = self.with_open(|state| {
            state
                .open_channel(self.id)?
                .consumers
                .retain(|consumer| consumer.tag != consumer_tag);
            state.cancelled.push(consumer_tag.to_string());
            Ok(())
        });
        future::ready(result).boxed()
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.settle(delivery, None)
    }

    fn nack(&self, delivery: &Delivery, _multiple: bool, requeue: bool) -> Result<(), BrokerError> {
        self.settle(delivery, Some(requeue))
    }

    fn publish<'a>(
        &'a self,
        exchange: &'a str,
        routing_key: &'a str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        let result = self.with_open(|state| {
            if let Some(error) = state.publish_failures.pop_front() {
                return Err(error);
            }
            let confirmed = state.open_channel(self.id)?.confirm;
            let message = Message {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                body,
                properties,
                redelivered: false,
            };
            state.route(message.clone())?;
            state.published.push(PublishedMessage {
                exchange: message.exchange,
                routing_key: message.routing_key,
                body: message.body,
                properties: message.properties,
                confirmed,
            });
            Ok(())
        });
        future::ready(result).boxed()
    }

    fn on_close(&self, observer: CloseObserver) {
        let observer = {
            let mut state = lock(&self.state);
            match state.channels.get_mut(&self.id) {
                Some(channel) if channel.open => {
                    channel.close_observers.push(observer);
                    None
                }
                _ => Some(observer),
            }
        };
        if let Some(observer) = observer {
            observer(None);
        }
    }

    fn on_error(&self, observer: ErrorObserver) {
        let mut state = lock(&self.state);
        if let Some(channel) = state.channels.get_mut(&self.id) {
            channel.error_observers.push(observer);
        }
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        let notices = {
            let mut state = lock(&self.state);
            if state.open_channel(self.id).is_err() {
                drop(state);
                return future::ready(Err(BrokerError::ChannelClosed(format!(
                    "channel {} is already closed",
                    self.id
                ))))
                .boxed();
            }
            state.close_channel(self.id, None)
        };
        deliver(notices);
        future::ready(Ok(())).boxed()
    }
}
