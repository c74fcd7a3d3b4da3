use amqp_resilience_core::ComponentEvent;
use std::time::Instant;

/// Events emitted by producers and consumers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Channel and topology were set up again after a reconnect.
    Recovered {
        component_name: String,
        timestamp: Instant,
    },
    /// The broker closed the channel.
    ChannelClosed {
        component_name: String,
        timestamp: Instant,
        reason: Option<String>,
    },
    /// A message was confirmed by the broker.
    Published {
        component_name: String,
        timestamp: Instant,
        routing_key: String,
    },
    /// A publish failed or had no channel.
    PublishFailed {
        component_name: String,
        timestamp: Instant,
        routing_key: String,
        error: String,
    },
    /// The consumer started consuming.
    Started {
        component_name: String,
        timestamp: Instant,
        consumer_tag: String,
    },
    /// The consumer resumed consuming after a reconnect.
    Resumed {
        component_name: String,
        timestamp: Instant,
        consumer_tag: String,
    },
    /// The consumer was stopped by its owner.
    Stopped {
        component_name: String,
        timestamp: Instant,
    },
    /// A delivery was handled and acknowledged.
    MessageHandled {
        component_name: String,
        timestamp: Instant,
        delivery_tag: u64,
    },
    /// The handler failed a delivery, which was rejected.
    HandlerFailed {
        component_name: String,
        timestamp: Instant,
        delivery_tag: u64,
        requeue: bool,
        error: String,
    },
}

impl ComponentEvent for ClientEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::Recovered { .. } => "recovered",
            ClientEvent::ChannelClosed { .. } => "channel_closed",
            ClientEvent::Published { .. } => "published",
            ClientEvent::PublishFailed { .. } => "publish_failed",
            ClientEvent::Started { .. } => "started",
            ClientEvent::Resumed { .. } => "resumed",
            ClientEvent::Stopped { .. } => "stopped",
            ClientEvent::MessageHandled { .. } => "message_handled",
            ClientEvent::HandlerFailed { .. } => "handler_failed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ClientEvent::Recovered { timestamp, .. }
            | ClientEvent::ChannelClosed { timestamp, .. }
            | ClientEvent::Published { timestamp, .. }
            | ClientEvent::PublishFailed { timestamp, .. }
            | ClientEvent::Started { timestamp, .. }
            | ClientEvent::Resumed { timestamp, .. }
            | ClientEvent::Stopped { timestamp, .. }
            | ClientEvent::MessageHandled { timestamp, .. }
            | ClientEvent::HandlerFailed { timestamp, .. } => *timestamp,
        }
    }

    fn component_name(&self) -> &str {
        match self {
            ClientEvent::Recovered { component_name, .. }
            | ClientEvent::ChannelClosed { component_name, .. }
            | ClientEvent::Published { component_name, .. }
            | ClientEvent::PublishFailed { component_name, .. }
            | ClientEvent::Started { component_name, .. }
            | ClientEvent::Resumed { component_name, .. }
            | ClientEvent::Stopped { component_name, .. }
            | ClientEvent::MessageHandled { component_name, .. }
            | ClientEvent::HandlerFailed { component_name, .. } => component_name,
        }
    }
}
