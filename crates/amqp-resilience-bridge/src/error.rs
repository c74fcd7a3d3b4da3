use amqp_resilience_core::BrokerError;
use std::fmt;

/// One end of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The broker messages are consumed from.
    Source,
    /// The broker messages are forwarded to.
    Target,
}

impl Side {
    /// Returns the lowercase side name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Target => "target",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by a [`Bridge`](crate::Bridge).
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The named side was not connected when the bridge tried to start.
    #[error("{side} connection is not connected")]
    NotConnected {
        /// The side that was not connected.
        side: Side,
    },

    /// The configuration was rejected when built.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Opening a channel or declaring topology failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl BridgeError {
    /// Returns true for [`BridgeError::NotConnected`].
    pub fn is_not_connected(&self) -> bool {
        matches!(self, BridgeError::NotConnected { .. })
    }
}
