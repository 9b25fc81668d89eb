//! Supervisor core: the worker pool and its lifecycle.
//!
//! The public entry point is [`Supervisor`], built through
//! [`SupervisorBuilder`] and controlled at runtime through [`SupervisorHandle`].
//!
//! Internal modules:
//! - [`slots`]: per-slot state, restart counters and health records;
//! - [`launcher`]: the [`Launcher`] seam and the supervisor's [`Inbox`];
//! - [`process`]: [`ProcessLauncher`], workers as child processes;
//! - [`supervisor`]: the supervision loop and shutdown state machine;
//! - [`shutdown`]: termination signal handling.

mod builder;
mod launcher;
mod process;
mod shutdown;
mod slots;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use launcher::{CommandSender, Inbox, Launcher, WorkerExitStatus, WorkerProcess};
pub use process::ProcessLauncher;
pub use shutdown::wait_for_shutdown_signal;
pub use slots::{FleetSnapshot, HealthRecord, SlotId, SlotSnapshot, SlotState, WorkerMetrics};
pub use supervisor::{Supervisor, SupervisorHandle};
