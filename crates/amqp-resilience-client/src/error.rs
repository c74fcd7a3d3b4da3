use amqp_resilience_core::BrokerError;

/// Errors returned by producers and consumers.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No channel is open; retry after the next reconnect.
    #[error("channel is not ready")]
    NotReady,

    /// The configuration was rejected when built.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Opening the channel or declaring topology failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The broker rejected or did not confirm a published message.
    #[error("publish failed: {0}")]
    PublishFailed(#[source] BrokerError),

    /// A message body could not be encoded as JSON.
    #[error("failed to encode message body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns true for [`ClientError::NotReady`].
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ClientError::NotReady)
    }
}
