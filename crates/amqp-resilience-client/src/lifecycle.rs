use std::fmt;

/// Consumption lifecycle of a [`Consumer`](crate::Consumer).
///
/// The resume decision after a reconnect is a single read of this value:
/// `Active` and `PendingResume` resume, `Inactive` does not.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ConsumerLifecycle {
    /// Not consuming, and not resuming after a reconnect.
    #[default]
    Inactive,
    /// Consuming under `consumer_tag`.
    Active {
        /// Tag assigned by the broker.
        consumer_tag: String,
    },
    /// Was consuming when the channel went away; resumes on the next reconnect.
    PendingResume,
}

impl ConsumerLifecycle {
    /// Returns true while consuming.
    pub fn is_active(&self) -> bool {
        matches!(self, ConsumerLifecycle::Active { .. })
    }

    /// Returns true if consumption resumes after a reconnect.
    pub fn resumes(&self) -> bool {
        !matches!(self, ConsumerLifecycle::Inactive)
    }

    /// Returns the consumer tag while consuming.
    pub fn consumer_tag(&self) -> Option<&str> {
        match self {
            ConsumerLifecycle::Active { consumer_tag } => Some(consumer_tag),
            _ => None,
        }
    }
}

impl fmt::Display for ConsumerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerLifecycle::Inactive => f.write_str("inactive"),
            ConsumerLifecycle::Active { consumer_tag } => write!(f, "active ({})", consumer_tag),
            ConsumerLifecycle::PendingResume => f.write_str("pending resume"),
        }
    }
}
