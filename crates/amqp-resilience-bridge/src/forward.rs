//! Classification of forwarding failures.
//!
//! A failed publish on the target either means the target channel is gone,
//! in which case the source message is left unacknowledged for the broker to
//! redeliver, or that this particular message could not be forwarded, in
//! which case it is rejected with the same requeue-once rule consumers use.

use amqp_resilience_core::BrokerError;

/// How a forwarding failure is recognised as a closed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelClosedDetection {
    /// Ask the error itself; falls back to its text for string-only errors.
    #[default]
    Structured,
    /// Match `"channel closed"` in the error text only.
    Substring,
}

impl ChannelClosedDetection {
    /// Returns true if `error` means the channel is closed.
    pub fn is_channel_closed(self, error: &BrokerError) -> bool {
        match self {
            ChannelClosedDetection::Structured => error.is_channel_closed(),
            ChannelClosedDetection::Substring => error
                .to_string()
                .to_ascii_lowercase()
                .contains("channel closed"),
        }
    }
}

/// What to do with a source message whose forward failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailureAction {
    /// Neither ack nor nack; the broker redelivers after the bridge restarts.
    Strand,
    /// Nack with requeue.
    Requeue,
    /// Nack without requeue; the message leaves the source queue.
    Drop,
}

impl FailureAction {
    /// Returns the action for a failed forward of a message.
    pub fn classify(
        error: &BrokerError,
        redelivered: bool,
        detection: ChannelClosedDetection,
    ) -> Self {
        if detection.is_channel_closed(error) {
            FailureAction::Strand
        } else if redelivered {
            FailureAction::Drop
        } else {
            FailureAction::Requeue
        }
    }

    /// Returns the lowercase action name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureAction::Strand => "strand",
            FailureAction::Requeue => "requeue",
            FailureAction::Drop => "drop",
        }
    }
}
