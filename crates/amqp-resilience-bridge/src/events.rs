use crate::error::Side;
use crate::forward::FailureAction;
use amqp_resilience_core::ComponentEvent;
use std::time::Instant;

/// Events emitted by a bridge.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// The bridge began forwarding.
    Started {
        component_name: String,
        timestamp: Instant,
        exchanges: Vec<String>,
    },
    /// The bridge was stopped by its owner.
    Stopped {
        component_name: String,
        timestamp: Instant,
    },
    /// Another `log_every` messages were forwarded.
    Progress {
        component_name: String,
        timestamp: Instant,
        forwarded: u64,
    },
    /// A message could not be forwarded.
    ForwardFailed {
        component_name: String,
        timestamp: Instant,
        exchange: String,
        routing_key: String,
        action: FailureAction,
        error: String,
    },
    /// The broker closed one of the bridge channels.
    ChannelClosed {
        component_name: String,
        timestamp: Instant,
        side: Side,
        reason: Option<String>,
    },
    /// The source channel was recycled to return stranded messages.
    StrandedReturned {
        component_name: String,
        timestamp: Instant,
        count: u64,
    },
}

impl ComponentEvent for BridgeEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BridgeEvent::Started { .. } => "started",
            BridgeEvent::Stopped { .. } => "stopped",
            BridgeEvent::Progress { .. } => "progress",
            BridgeEvent::ForwardFailed { .. } => "forward_failed",
            BridgeEvent::ChannelClosed { .. } => "channel_closed",
            BridgeEvent::StrandedReturned { .. } => "stranded_returned",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            BridgeEvent::Started { timestamp, .. }
            | BridgeEvent::Stopped { timestamp, .. }
            | BridgeEvent::Progress { timestamp, .. }
            | BridgeEvent::ForwardFailed { timestamp, .. }
            | BridgeEvent::ChannelClosed { timestamp, .. }
            | BridgeEvent::StrandedReturned { timestamp, .. } => *timestamp,
        }
    }

    fn component_name(&self) -> &str {
        match self {
            BridgeEvent::Started { component_name, .. }
            | BridgeEvent::Stopped { component_name, .. }
            | BridgeEvent::Progress { component_name, .. }
            | BridgeEvent::ForwardFailed { component_name, .. }
            | BridgeEvent::ChannelClosed { component_name, .. }
            | BridgeEvent::StrandedReturned { component_name, .. } => component_name,
        }
    }
}
