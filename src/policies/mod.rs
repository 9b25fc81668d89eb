//! Restart and backoff policies.
//!
//! ## Contents
//! - [`RestartPolicy`] restart budget, health timeout, shutdown grace, emergency threshold
//! - [`BackoffPolicy`] how long a crashed slot waits before respawning
//! - [`JitterPolicy`]  randomization to avoid synchronized respawns
//!
//! ## Quick wiring
//! ```text
//! FleetConfig { restart: RestartPolicy { backoff: BackoffPolicy { jitter, .. }, .. }, .. }
//!      └─► core::Supervisor uses:
//!           - allows_restart(count) to decide respawn vs exhausted
//!           - restart_delay(count) / emergency_delay() for timers
//!           - is_degraded(live, pool) for emergency restarts
//! ```

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::{RestartPolicy, ThresholdBoundary};
