//! Registry of callbacks run after every successful (re)connection.

use amqp_resilience_core::{lock, BoxError};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

pub(crate) type Subscriber = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

#[derive(Default)]
struct Entries {
    next_id: u64,
    subscribers: Vec<(u64, Subscriber)>,
}

/// Ordered set of reconnect subscribers.
///
/// Notification iterates a snapshot and re-checks membership before each
/// call, so a subscriber removed mid-notification is not called and one added
/// mid-notification waits for the next reconnect.
#[derive(Default)]
pub(crate) struct ReconnectSubscribers {
    entries: Mutex<Entries>,
}

impl ReconnectSubscribers {
    pub(crate) fn add(&self, subscriber: Subscriber) -> u64 {
        let mut entries = lock(&self.entries);
        entries.next_id += 1;
        let id = entries.next_id;
        entries.subscribers.push((id, subscriber));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.subscribers.len();
        entries.subscribers.retain(|(entry, _)| *entry != id);
        entries.subscribers.len() != before
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        lock(&self.entries)
            .subscribers
            .iter()
            .any(|(entry, _)| *entry == id)
    }

    pub(crate) fn snapshot(&self) -> Vec<(u64, Subscriber)> {
        lock(&self.entries).subscribers.clone()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).subscribers.len()
    }
}

/// Registration handle returned by
/// [`ConnectionManager::on_reconnect`](crate::ConnectionManager::on_reconnect).
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping the subscription unsubscribes the callback immediately"]
pub struct ReconnectSubscription {
    id: u64,
    registry: Weak<ReconnectSubscribers>,
}

impl ReconnectSubscription {
    pub(crate) fn new(id: u64, registry: &Arc<ReconnectSubscribers>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    /// Removes the callback. Calling this more than once is harmless.
    pub fn unsubscribe(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        self.registry = Weak::new();
    }

    /// Returns true while the callback is still registered.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.contains(self.id))
    }
}

impl Drop for ReconnectSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for ReconnectSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectSubscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
