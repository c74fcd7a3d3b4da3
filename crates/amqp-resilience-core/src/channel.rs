//! Exclusively owned channel handle.

use crate::broker::{BrokerChannel, BrokerError};
use crate::lock;
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Slot {
    channel: Option<Arc<dyn BrokerChannel>>,
    generation: u64,
}

/// Holder for the channel a component owns.
///
/// The slot empties itself the instant the installed channel reports closure,
/// whatever the owning component believes its state to be. Channels removed
/// with [`ChannelSlot::take`] are forgotten first, so their later close
/// notification is ignored: only externally forced closures reach the
/// `on_closed` hook given to [`ChannelSlot::install`].
#[derive(Clone, Default)]
pub struct ChannelSlot {
    slot: Arc<Mutex<Slot>>,
}

impl ChannelSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current channel, if one is open.
    pub fn get(&self) -> Option<Arc<dyn BrokerChannel>> {
        lock(&self.slot).channel.clone()
    }

    /// Returns true if a channel is installed.
    pub fn is_open(&self) -> bool {
        lock(&self.slot).channel.is_some()
    }

    /// Installs `channel`, replacing any previous one without closing it.
    ///
    /// `on_closed` runs once if the broker closes this channel while it is
    /// still installed.
    pub fn install<F>(&self, channel: Arc<dyn BrokerChannel>, on_closed: F)
    where
        F: Fn(Option<BrokerError>) + Send + Sync + 'static,
    {
        let generation = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            slot.channel = Some(Arc::clone(&channel));
            slot.generation
        };

        let weak = Arc::downgrade(&self.slot);
        channel.on_close(Box::new(move |reason| {
            let Some(slot) = weak.upgrade() else {
                return;
            };
            let cleared = {
                let mut slot = lock(&slot);
                if slot.generation == generation && slot.channel.is_some() {
                    slot.channel = None;
                    true
                } else {
                    false
                }
            };
            if cleared {
                on_closed(reason);
            }
        }));
    }

    /// Removes the channel so that its closure is treated as intended.
    pub fn take(&self) -> Option<Arc<dyn BrokerChannel>> {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        slot.channel.take()
    }
}

impl fmt::Debug for ChannelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSlot")
            .field("open", &self.is_open())
            .finish()
    }
}
