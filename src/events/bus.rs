//! # Broadcast bus for supervisor lifecycle events.
//!
//! ```text
//!   Supervisor loop ──┐            ┌──► fan-out listener ──► SubscriberSet
//!                     ├──► Bus ────┤
//!   SubscriberSet  ───┘            └──► SupervisorHandle::subscribe()
//! ```
//!
//! Publishing never blocks. The ring buffer holds the last `capacity` events
//! shared by all receivers; a receiver that falls behind gets
//! `RecvError::Lagged(n)` and resumes after the skipped events. Events sent
//! while nobody listens are gone.

use tokio::sync::broadcast;

use super::event::Event;

/// Cloneable publish/subscribe handle over [`tokio::sync::broadcast`].
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus keeping at most `capacity` (at least 1) undelivered events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes to every current receiver; dropped if there are none.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// A new receiver of events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
