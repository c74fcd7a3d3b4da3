use amqp_resilience_core::{ComponentEvent, ConnectionState};
use std::time::{Duration, Instant};

/// Events emitted by a connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The manager moved from one state to another.
    StateTransition {
        component_name: String,
        timestamp: Instant,
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A connection attempt is starting.
    Reconnecting {
        component_name: String,
        timestamp: Instant,
        attempt: u32,
    },
    /// A connection was established.
    Connected {
        component_name: String,
        timestamp: Instant,
        attempt: u32,
    },
    /// The connection was closed underneath the manager.
    Disconnected {
        component_name: String,
        timestamp: Instant,
        reason: Option<String>,
    },
    /// A connection attempt failed; the next one follows after `delay`.
    AttemptFailed {
        component_name: String,
        timestamp: Instant,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The retry cap was reached and the loop gave up.
    RetriesExhausted {
        component_name: String,
        timestamp: Instant,
        attempts: u32,
    },
    /// A reconnect subscriber returned an error or panicked.
    SubscriberFailed {
        component_name: String,
        timestamp: Instant,
        error: String,
    },
}

impl ComponentEvent for ConnectionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ConnectionEvent::StateTransition { .. } => "state_transition",
            ConnectionEvent::Reconnecting { .. } => "reconnecting",
            ConnectionEvent::Connected { .. } => "connected",
            ConnectionEvent::Disconnected { .. } => "disconnected",
            ConnectionEvent::AttemptFailed { .. } => "attempt_failed",
            ConnectionEvent::RetriesExhausted { .. } => "retries_exhausted",
            ConnectionEvent::SubscriberFailed { .. } => "subscriber_failed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ConnectionEvent::StateTransition { timestamp, .. }
            | ConnectionEvent::Reconnecting { timestamp, .. }
            | ConnectionEvent::Connected { timestamp, .. }
            | ConnectionEvent::Disconnected { timestamp, .. }
            | ConnectionEvent::AttemptFailed { timestamp, .. }
            | ConnectionEvent::RetriesExhausted { timestamp, .. }
            | ConnectionEvent::SubscriberFailed { timestamp, .. } => *timestamp,
        }
    }

    fn component_name(&self) -> &str {
        match self {
            ConnectionEvent::StateTransition { component_name, .. }
            | ConnectionEvent::Reconnecting { component_name, .. }
            | ConnectionEvent::Connected { component_name, .. }
            | ConnectionEvent::Disconnected { component_name, .. }
            | ConnectionEvent::AttemptFailed { component_name, .. }
            | ConnectionEvent::RetriesExhausted { component_name, .. }
            | ConnectionEvent::SubscriberFailed { component_name, .. } => component_name,
        }
    }
}
