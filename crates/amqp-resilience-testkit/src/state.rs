//! Broker-side bookkeeping shared by the broker and its handles.

use crate::routing;
use amqp_resilience_core::{
    BrokerError, CloseObserver, Delivery, DeliveryHandler, ErrorObserver, ExchangeKind,
    MessageProperties,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// A message accepted by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Exchange the message was published to (`""` is the default exchange).
    pub exchange: String,
    /// Routing key.
    pub routing_key: String,
    /// Body bytes.
    pub body: Vec<u8>,
    /// Properties sent with the message.
    pub properties: MessageProperties,
    /// Whether it was published on a confirm channel.
    pub confirmed: bool,
}

/// An acknowledgement received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    /// Queue the message came from.
    pub queue: String,
    /// Routing key of the message.
    pub routing_key: String,
    /// Body of the acknowledged message.
    pub body: Vec<u8>,
}

/// A negative acknowledgement received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackRecord {
    /// Queue the message came from.
    pub queue: String,
    /// Body of the rejected message.
    pub body: Vec<u8>,
    /// Whether the client asked for the message to be requeued.
    pub requeue: bool,
    /// Whether the message had been delivered before.
    pub redelivered: bool,
}

/// A queue binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Bound queue.
    pub queue: String,
    /// Source exchange.
    pub exchange: String,
    /// Routing pattern.
    pub pattern: String,
}

/// Public view of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Broker-assigned channel id.
    pub id: u64,
    /// Whether the channel is in confirm mode.
    pub confirm: bool,
    /// Prefetch limit (0 means unlimited).
    pub prefetch: u16,
    /// Whether the channel is still open.
    pub open: bool,
    /// Deliveries waiting for an ack or nack.
    pub unacked: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Message {
    pub(crate) exchange: String,
    pub(crate) routing_key: String,
    pub(crate) body: Vec<u8>,
    pub(crate) properties: MessageProperties,
    pub(crate) redelivered: bool,
}

pub(crate) struct Unacked {
    pub(crate) queue: String,
    pub(crate) message: Message,
}

pub(crate) struct Consumer {
    pub(crate) tag: String,
    pub(crate) queue: String,
    pub(crate) handler: DeliveryHandler,
}

pub(crate) struct ChannelRecord {
    pub(crate) connection: u64,
    pub(crate) confirm: bool,
    pub(crate) prefetch: u16,
    pub(crate) open: bool,
    pub(crate) next_delivery_tag: u64,
    pub(crate) unacked: BTreeMap<u64, Unacked>,
    pub(crate) consumers: Vec<Consumer>,
    pub(crate) close_observers: Vec<CloseObserver>,
    pub(crate) error_observers: Vec<ErrorObserver>,
}

impl ChannelRecord {
    pub(crate) fn new(connection: u64, confirm: bool) -> Self {
        Self {
            connection,
            confirm,
            prefetch: 0,
            open: true,
            next_delivery_tag: 0,
            unacked: BTreeMap::new(),
            consumers: Vec::new(),
            close_observers: Vec::new(),
            error_observers: Vec::new(),
        }
    }

    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.unacked.len() < usize::from(self.prefetch)
    }
}

#[derive(Default)]
pub(crate) struct ConnectionRecord {
    pub(crate) open: bool,
    pub(crate) close_observers: Vec<CloseObserver>,
    pub(crate) error_observers: Vec<ErrorObserver>,
}

#[derive(Default)]
pub(crate) struct Queue {
    pub(crate) messages: VecDeque<Message>,
}

/// Observer calls collected under the lock and run after releasing it.
pub(crate) enum Notice {
    Error(ErrorObserver, BrokerError),
    Close(CloseObserver, Option<BrokerError>),
}

pub(crate) fn deliver(notices: Vec<Notice>) {
    for notice in notices {
        match notice {
            Notice::Error(observer, error) => observer(&error),
            Notice::Close(observer, reason) => observer(reason),
        }
    }
}

pub(crate) fn not_found(what: &str, name: &str) -> BrokerError {
    BrokerError::Protocol {
        code: 404,
        text: format!("NOT_FOUND - no {} '{}'", what, name),
    }
}

pub(crate) struct BrokerState {
    pub(crate) reachable: bool,
    pub(crate) refuse_next: u32,
    pub(crate) connect_attempts: u32,
    pub(crate) channel_delay: Option<Duration>,
    pub(crate) next_id: u64,
    pub(crate) next_consumer: u64,
    pub(crate) connections: BTreeMap<u64, ConnectionRecord>,
    pub(crate) channels: BTreeMap<u64, ChannelRecord>,
    pub(crate) exchanges: BTreeMap<String, ExchangeKind>,
    pub(crate) queues: BTreeMap<String, Queue>,
    pub(crate) bindings: Vec<Binding>,
    pub(crate) publish_failures: VecDeque<BrokerError>,
    pub(crate) published: Vec<PublishedMessage>,
    pub(crate) acks: Vec<AckRecord>,
    pub(crate) nacks: Vec<NackRecord>,
    pub(crate) cancelled: Vec<String>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            reachable: true,
            refuse_next: 0,
            connect_attempts: 0,
            channel_delay: None,
            next_id: 0,
            next_consumer: 0,
            connections: BTreeMap::new(),
            channels: BTreeMap::new(),
            exchanges: BTreeMap::new(),
            queues: BTreeMap::new(),
            bindings: Vec::new(),
            publish_failures: VecDeque::new(),
            published: Vec::new(),
            acks: Vec::new(),
            nacks: Vec::new(),
            cancelled: Vec::new(),
        }
    }
}

impl BrokerState {
    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn next_consumer_tag(&mut self) -> String {
        self.next_consumer += 1;
        format!("amq.ctag-{}", self.next_consumer)
    }

    pub(crate) fn open_channel(&mut self, id: u64) -> Result<&mut ChannelRecord, BrokerError> {
        match self.channels.get_mut(&id) {
            Some(channel) if channel.open => Ok(channel),
            _ => Err(BrokerError::ChannelClosed(format!("channel {} is closed", id))),
        }
    }

    /// Routes a message to every matching queue and returns how many received it.
    pub(crate) fn route(&mut self, message: Message) -> Result<usize, BrokerError> {
        let targets: Vec<String> = if message.exchange.is_empty() {
            if self.queues.contains_key(&message.routing_key) {
                vec![message.routing_key.clone()]
            } else {
                Vec::new()
            }
        } else {
            let kind = *self
                .exchanges
                .get(&message.exchange)
                .ok_or_else(|| not_found("exchange", &message.exchange))?;
            let mut targets: Vec<String> = Vec::new();
            for binding in &self.bindings {
                if binding.exchange == message.exchange
                    && routing::routes(kind, &binding.pattern, &message.routing_key)
                    && !targets.contains(&binding.queue)
                {
                    targets.push(binding.queue.clone());
                }
            }
            targets
        };

        for queue in &targets {
            if let Some(queue) = self.queues.get_mut(queue) {
                queue.messages.push_back(message.clone());
            }
        }
        Ok(targets.len())
    }

    fn requeue(&mut self, unacked: BTreeMap<u64, Unacked>) {
        for (_, entry) in unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&entry.queue) {
                let mut message = entry.message;
                message.redelivered = true;
                queue.messages.push_front(message);
            }
        }
    }

    /// Closes a channel, returning its unacknowledged deliveries to their queues.
    pub(crate) fn close_channel(&mut self, id: u64, reason: Option<BrokerError>) -> Vec<Notice> {
        let Some(channel) = self.channels.get_mut(&id) else {
            return Vec::new();
        };
        if !channel.open {
            return Vec::new();
        }
        channel.open = false;
        channel.consumers.clear();
        channel.error_observers.clear();
        let unacked = std::mem::take(&mut channel.unacked);
        let observers = std::mem::take(&mut channel.close_observers);
        self.requeue(unacked);

        observers
            .into_iter()
            .map(|observer| Notice::Close(observer, reason.clone()))
            .collect()
    }

    /// Closes a connection and all of its channels.
    pub(crate) fn close_connection(
        &mut self,
        id: u64,
        reason: Option<BrokerError>,
    ) -> Vec<Notice> {
        let Some(connection) = self.connections.get_mut(&id) else {
            return Vec::new();
        };
        if !connection.open {
            return Vec::new();
        }
        connection.open = false;
        let close_observers = std::mem::take(&mut connection.close_observers);
        let error_observers = std::mem::take(&mut connection.error_observers);

        let channel_ids: Vec<u64> = self
            .channels
            .iter()
            .filter(|(_, channel)| channel.connection == id && channel.open)
            .map(|(id, _)| *id)
            .collect();

        let mut notices = Vec::new();
        for channel in channel_ids {
            notices.extend(self.close_channel(channel, reason.clone()));
        }
        if let Some(error) = &reason {
            notices.extend(
                error_observers
                    .into_iter()
                    .map(|observer| Notice::Error(observer, error.clone())),
            );
        }
        notices.extend(
            close_observers
                .into_iter()
                .map(|observer| Notice::Close(observer, reason.clone())),
        );
        notices
    }

    /// Hands the next eligible message to a consumer, in channel order.
    pub(crate) fn next_delivery(&mut self) -> Option<(DeliveryHandler, Delivery)> {
        let BrokerState {
            channels, queues, ..
        } = self;

        for channel in channels.values_mut() {
            if !channel.open || !channel.has_capacity() {
                continue;
            }
            for consumer in &channel.consumers {
                let Some(queue) = queues.get_mut(&consumer.queue) else {
                    continue;
                };
                let Some(message) = queue.messages.pop_front() else {
                    continue;
                };

                channel.next_delivery_tag += 1;
                let delivery = Delivery {
                    delivery_tag: channel.next_delivery_tag,
                    consumer_tag: consumer.tag.clone(),
                    exchange: message.exchange.clone(),
                    routing_key: message.routing_key.clone(),
                    redelivered: message.redelivered,
                    body: message.body.clone(),
                    properties: message.properties.clone(),
                };
                channel.unacked.insert(
                    channel.next_delivery_tag,
                    Unacked {
                        queue: consumer.queue.clone(),
                        message,
                    },
                );
                return Some((Arc::clone(&consumer.handler), delivery));
            }
        }
        None
    }
}
