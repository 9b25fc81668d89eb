//! Supervisor events: types and broadcast bus.
//!
//! This module groups the lifecycle event **data model** and the **bus** used
//! to publish/subscribe to what the supervisor does with its workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` (spawns, exits, restarts, shutdown),
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the supervisor's fan-out listener (feeds `SubscriberSet`)
//!   and anyone holding `SupervisorHandle::subscribe()`.
//!
//! Application-level events between workers travel through
//! [`EventRelay`](crate::EventRelay), not through this bus.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
