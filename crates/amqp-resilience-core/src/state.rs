//! Connection state shared by managers and metric snapshots.

use std::fmt;

/// Lifecycle state of a managed connection.
///
/// Only the owning connection manager moves between states; channel owners
/// observe them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,

    /// A connection attempt is in flight.
    Connecting,

    /// Connected and usable.
    Connected,

    /// The connection was lost (or an attempt failed) and another attempt is scheduled.
    Reconnecting,
}

impl ConnectionState {
    /// Returns the lowercase name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }

    /// Returns true for [`ConnectionState::Connected`].
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
