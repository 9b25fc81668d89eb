//! # The subscriber extension point.
//!
//! A [`Subscribe`] implementation receives the supervisor's lifecycle events
//! on its own task, fed by a bounded queue owned by
//! [`SubscriberSet`](crate::subscribers::SubscriberSet). It may be slow; only
//! its own queue fills up, and overflowing events are dropped for it alone.
//!
//! ```rust
//! use fleetvisor::{Event, EventKind, Subscribe};
//!
//! struct Pager;
//!
//! #[async_trait::async_trait]
//! impl Subscribe for Pager {
//!     async fn on_event(&self, ev: &Event) {
//!         // page whoever is on call
//!         let _ = ev.slot;
//!     }
//!     fn name(&self) -> &'static str { "pager" }
//!     fn accepts(&self, kind: EventKind) -> bool {
//!         matches!(kind, EventKind::SlotExhausted | EventKind::EmergencyRestart)
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Receiver of supervisor lifecycle events.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event. Panics are caught and reported as `SubscriberPanicked`.
    async fn on_event(&self, event: &Event);

    /// Name used in logs and overflow/panic reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }

    /// Whether events of `kind` should be queued for this subscriber at all.
    ///
    /// Heartbeats arrive once per worker per interval; filtering them here
    /// keeps them out of the queue.
    fn accepts(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }
}
