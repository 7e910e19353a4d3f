//! Per-session publish point between the session store and the browser tab.
//!
//! At most one subscriber is canonical per session: a new `subscribe` for an
//! id with a live subscriber evicts the old one, which covers page reloads
//! and reconnects. Publishing is fire-and-forget over a bounded channel so a
//! stalled tab can never stall the analyzer's callback path. The terminal
//! update is retained per session, so a subscriber arriving after completion
//! receives it immediately instead of hanging.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::model::JobUpdate;

/// Per-subscriber buffer. Small on purpose: updates are state snapshots, so
/// a dropped one is superseded by the next.
const SUBSCRIBER_BUFFER: usize = 32;

#[derive(Default)]
struct SessionChannel {
    /// Sender side of the current subscriber's channel, if one is attached.
    tx: Option<mpsc::Sender<JobUpdate>>,
    /// Retained terminal update for late or reconnecting subscribers.
    terminal: Option<JobUpdate>,
}

/// Publish/subscribe hub, keyed by session id.
#[derive(Default)]
pub struct ProgressHub {
    channels: Mutex<HashMap<String, SessionChannel>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a publish slot for a newly registered session. Called by the
    /// store on `create`, before any event can be published.
    pub fn register(&self, id: &str) {
        let mut channels = self.channels.lock().expect("hub lock poisoned");
        channels.entry(id.to_string()).or_default();
    }

    /// Attach a subscriber for `id`, evicting any existing one.
    ///
    /// Returns `None` for ids the hub has never seen (unregistered or
    /// already reaped). If the session already reached a terminal state the
    /// returned channel yields exactly the retained terminal update and then
    /// closes.
    pub fn subscribe(&self, id: &str) -> Option<mpsc::Receiver<JobUpdate>> {
        let mut channels = self.channels.lock().expect("hub lock poisoned");
        let slot = channels.get_mut(id)?;

        if let Some(terminal) = &slot.terminal {
            let (tx, rx) = mpsc::channel(1);
            // Capacity 1 and the sender is dropped right here, so the
            // receiver sees the terminal update and then end-of-stream.
            let _ = tx.try_send(terminal.clone());
            return Some(rx);
        }

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if slot.tx.replace(tx).is_some() {
            // Dropping the old sender ends the previous subscriber's stream.
            debug!(session_id = %id, "evicted previous subscriber");
        }
        Some(rx)
    }

    /// Forward an accepted transition to the current subscriber, if any.
    ///
    /// Never blocks: one buffer slot is always kept free for the terminal
    /// update, so a full buffer drops progress snapshots (the next one
    /// supersedes them) but never the terminal. Terminal updates are
    /// retained and close the channel.
    pub fn publish(&self, id: &str, update: JobUpdate) {
        let mut channels = self.channels.lock().expect("hub lock poisoned");
        let Some(slot) = channels.get_mut(id) else {
            warn!(session_id = %id, "publish for unknown session dropped");
            return;
        };

        let terminal = update.is_terminal();
        if let Some(tx) = &slot.tx {
            if terminal {
                // The reserved slot guarantees room; a failure here means
                // the receiver is gone, which the retained copy covers.
                let _ = tx.try_send(update.clone());
            } else if tx.capacity() > 1 {
                let _ = tx.try_send(update.clone());
            } else {
                debug!(session_id = %id, "subscriber buffer full, progress update dropped");
            }
        }
        if terminal {
            slot.terminal = Some(update);
            // Closing the sender delivers end-of-stream after the terminal
            // update drains.
            slot.tx = None;
        }
    }

    /// Drop all bookkeeping for a reaped session.
    pub fn remove(&self, id: &str) {
        let mut channels = self.channels.lock().expect("hub lock poisoned");
        channels.remove(id);
    }

    #[cfg(test)]
    fn has_session(&self, id: &str) -> bool {
        self.channels
            .lock()
            .expect("hub lock poisoned")
            .contains_key(id)
    }
}
