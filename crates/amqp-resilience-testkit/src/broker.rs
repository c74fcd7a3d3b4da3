use crate::handles::MemoryConnection;
use crate::state::{
    deliver, AckRecord, Binding, BrokerState, ChannelInfo, ConnectionRecord, Message, NackRecord,
    PublishedMessage,
};
use amqp_resilience_core::{
    lock, Broker, BrokerConnection, BrokerError, ConnectionOptions, ExchangeKind,
    MessageProperties,
};
use futures::future::{self, BoxFuture, FutureExt};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Upper bound for one `dispatch` call, so a handler that requeues forever
// cannot hang a test.
const DISPATCH_LIMIT: usize = 10_000;

/// An in-process broker implementing the broker collaborator traits.
///
/// Clones share the same broker. Deliveries are not pushed on their own:
/// tests call [`MemoryBroker::dispatch`] to hand queued messages to
/// consumers, which makes every interleaving deterministic.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Creates a reachable, empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes connection attempts succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.state).reachable = reachable;
    }

    /// Refuses the next `count` connection attempts even while reachable.
    pub fn refuse_next_connects(&self, count: u32) {
        lock(&self.state).refuse_next = count;
    }

    /// Delays every channel open by `delay`; `None` opens immediately.
    pub fn set_channel_delay(&self, delay: Option<Duration>) {
        lock(&self.state).channel_delay = delay;
    }

    /// Number of connection attempts received so far.
    pub fn connect_attempts(&self) -> u32 {
        lock(&self.state).connect_attempts
    }

    /// Number of open connections.
    pub fn open_connections(&self) -> usize {
        lock(&self.state)
            .connections
            .values()
            .filter(|connection| connection.open)
            .count()
    }

    /// Every channel ever opened, in creation order.
    pub fn channels(&self) -> Vec<ChannelInfo> {
        lock(&self.state)
            .channels
            .iter()
            .map(|(id, channel)| ChannelInfo {
                id: *id,
                confirm: channel.confirm,
                prefetch: channel.prefetch,
                open: channel.open,
                unacked: channel.unacked.len(),
            })
            .collect()
    }

    /// Number of open channels.
    pub fn open_channels(&self) -> usize {
        self.channels().iter().filter(|channel| channel.open).count()
    }

    /// Drops every open connection as a network failure would.
    ///
    /// Unacknowledged deliveries go back to their queues marked redelivered,
    /// and channel then connection close observers run with an error.
    pub fn drop_connections(&self) {
        let notices = {
            let mut state = lock(&self.state);
            let ids: Vec<u64> = state
                .connections
                .iter()
                .filter(|(_, connection)| connection.open)
                .map(|(id, _)| *id)
                .collect();
            let mut notices = Vec::new();
            for id in ids {
                notices.extend(state.close_connection(
                    id,
                    Some(BrokerError::ConnectionClosed(
                        "CONNECTION_FORCED - broker forced connection closure".to_string(),
                    )),
                ));
            }
            notices
        };
        tracing::debug!(observers = notices.len(), "dropping memory broker connections");
        deliver(notices);
    }

    /// Closes every open channel with a channel error, keeping connections up.
    pub fn close_all_channels(&self) {
        let notices = {
            let mut state = lock(&self.state);
            let ids: Vec<u64> = state
                .channels
                .iter()
                .filter(|(_, channel)| channel.open)
                .map(|(id, _)| *id)
                .collect();
            let mut notices = Vec::new();
            for id in ids {
                notices.extend(state.close_channel(
                    id,
                    Some(BrokerError::ChannelClosed(
                        "channel closed by broker".to_string(),
                    )),
                ));
            }
            notices
        };
        deliver(notices);
    }

    /// Makes the next publish on any channel fail with `error`.
    ///
    /// Failures queue up and are consumed one publish at a time.
    pub fn fail_next_publish(&self, error: BrokerError) {
        lock(&self.state).publish_failures.push_back(error);
    }

    /// Publishes as an outside client would and returns how many queues received the message.
    pub fn publish_external(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<usize, BrokerError> {
        self.publish_external_with(exchange, routing_key, body, MessageProperties::default())
    }

    /// Like [`publish_external`](Self::publish_external), with explicit properties.
    pub fn publish_external_with(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Vec<u8>>,
        properties: MessageProperties,
    ) -> Result<usize, BrokerError> {
        lock(&self.state).route(Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.into(),
            properties,
            redelivered: false,
        })
    }

    /// Declares a queue from outside any connection.
    pub fn declare_queue(&self, name: &str) {
        lock(&self.state).queues.entry(name.to_string()).or_default();
    }

    /// Declares an exchange from outside any connection.
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) {
        lock(&self.state).exchanges.insert(name.to_string(), kind);
    }

    /// Hands queued messages to consumers until none is eligible.
    ///
    /// Each handler future is awaited before the next message is handed out,
    /// and prefetch limits are honoured. Returns the number of deliveries.
    pub async fn dispatch(&self) -> usize {
        let mut delivered = 0;
        while delivered < DISPATCH_LIMIT {
            let Some((handler, delivery)) = lock(&self.state).next_delivery() else {
                break;
            };
            handler(delivery).await;
            delivered += 1;
        }
        delivered
    }

    /// Messages accepted through publish calls, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state).published.clone()
    }

    /// Acknowledgements received, in order.
    pub fn acks(&self) -> Vec<AckRecord> {
        lock(&self.state).acks.clone()
    }

    /// Negative acknowledgements received, in order.
    pub fn nacks(&self) -> Vec<NackRecord> {
        lock(&self.state).nacks.clone()
    }

    /// Consumer tags cancelled by clients, in order.
    pub fn cancelled(&self) -> Vec<String> {
        lock(&self.state).cancelled.clone()
    }

    /// Number of messages waiting in `queue`.
    pub fn queue_depth(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map_or(0, |queue| queue.messages.len())
    }

    /// Deliveries of `queue` that wait for an ack or nack.
    pub fn unacked(&self, queue: &str) -> usize {
        lock(&self.state)
            .channels
            .values()
            .flat_map(|channel| channel.unacked.values())
            .filter(|entry| entry.queue == queue)
            .count()
    }

    /// Tags of the live consumers on `queue`.
    pub fn consumer_tags(&self, queue: &str) -> Vec<String> {
        lock(&self.state)
            .channels
            .values()
            .filter(|channel| channel.open)
            .flat_map(|channel| channel.consumers.iter())
            .filter(|consumer| consumer.queue == queue)
            .map(|consumer| consumer.tag.clone())
            .collect()
    }

    /// Kind of a declared exchange.
    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        lock(&self.state).exchanges.get(name).copied()
    }

    /// Returns true if `name` was declared.
    pub fn has_queue(&self, name: &str) -> bool {
        lock(&self.state).queues.contains_key(name)
    }

    /// Every binding, in declaration order.
    pub fn bindings(&self) -> Vec<Binding> {
        lock(&self.state).bindings.clone()
    }
}

impl Broker for MemoryBroker {
    fn connect<'a>(
        &'a self,
        options: &'a ConnectionOptions,
    ) -> BoxFuture<'a, Result<Arc<dyn BrokerConnection>, BrokerError>> {
        let result = {
            let mut state = lock(&self.state);
            state.connect_attempts += 1;
            if !state.reachable || state.refuse_next > 0 {
                state.refuse_next = state.refuse_next.saturating_sub(1);
                Err(BrokerError::ConnectionRefused(format!(
                    "connect ECONNREFUSED {}:{}",
                    options.hostname, options.port
                )))
            } else {
                let id = state.next_id();
                state.connections.insert(
                    id,
                    ConnectionRecord {
                        open: true,
                        ..Default::default()
                    },
                );
                let connection: Arc<dyn BrokerConnection> = Arc::new(MemoryConnection {
                    id,
                    state: Arc::clone(&self.state),
                });
                Ok(connection)
            }
        };
        future::ready(result).boxed()
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("open_connections", &self.open_connections())
            .field("open_channels", &self.open_channels())
            .finish()
    }
}
