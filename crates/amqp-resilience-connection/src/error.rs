use amqp_resilience_core::BrokerError;

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The retry cap was reached before a connection was established.
    #[error("failed to connect after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Failure of the last attempt.
        #[source]
        source: BrokerError,
    },

    /// The manager was closed.
    #[error("connection manager is shut down")]
    Shutdown,
}

impl ConnectionError {
    /// Returns the number of attempts made, if the retry cap was reached.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ConnectionError::RetriesExhausted { attempts, .. } => Some(*attempts),
            ConnectionError::Shutdown => None,
        }
    }
}
