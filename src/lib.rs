//! # fleetvisor
//!
//! **Fleetvisor** supervises a pool of worker processes on one host.
//!
//! A supervisor process keeps `pool_size` workers alive, restarts them on
//! crash under a bounded-retry policy, kills workers whose heartbeats stop,
//! restarts the whole fleet when too many slots have given up, and shuts
//! everything down gracefully on a termination signal. Application events
//! emitted in any process are relayed so listeners everywhere see them.
//!
//! ## Architecture
//! ### Overview
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor (single actor, owns the SlotTable)                    │
//! │  - RestartPolicy (budget, backoff, health timeout, grace)         │
//! │  - Launcher (ProcessLauncher: one child process per slot)         │
//! │  - EventRelay (fan-out of FLEET_EVENTs between workers)           │
//! │  - Bus + SubscriberSet (lifecycle events → LogWriter, custom)     │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        │ stdin/stdout     │                  │     NDJSON control channel
//!        ▼                  ▼                  ▼
//!  ┌────────────┐    ┌────────────┐    ┌────────────┐
//!  │  worker 0  │    │  worker 1  │    │  worker N  │
//!  │WorkerRuntime    │WorkerRuntime    │WorkerRuntime
//!  │ - Service  │    │ - Service  │    │ - Service  │
//!  │ - relay    │    │ - relay    │    │ - relay    │
//!  │ - heartbeat│    │ - heartbeat│    │ - heartbeat│
//!  └────────────┘    └────────────┘    └────────────┘
//! ```
//!
//! ### Slot lifecycle
//! ```text
//! spawn ──► Starting ──► Running ──► exit / unhealthy
//!                                       │
//!          ┌────────────────────────────┴──────────────────┐
//!          ▼ restart_count < max_attempts                   ▼ otherwise
//!   restart_count += 1                               Exhausted (logged)
//!   respawn after backoff                            live fraction ≤ threshold?
//!                                                      └─► emergency restart:
//!                                                          drain, reset all
//!                                                          counters, respawn
//!                                                          after 2 × backoff
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                            |
//! |-------------------|----------------------------------------------------------|-----------------------------------------------|
//! | **Supervision**   | Pool, restarts, health checks, shutdown                  | [`Supervisor`], [`SupervisorHandle`]          |
//! | **Workers**       | Host a service, heartbeat, trap fatal errors, drain      | [`WorkerRuntime`], [`Service`], [`ServiceFn`] |
//! | **Relay**         | Named events visible across the fleet                    | [`EventRelay`], [`FleetEvent`]                |
//! | **Policies**      | Restart budget, backoff curve, emergency threshold       | [`RestartPolicy`], [`BackoffPolicy`]          |
//! | **Subscriber API**| Hook into supervision lifecycle events                   | [`Subscribe`], [`LogWriter`]                  |
//! | **Launching**     | How workers are started                                  | [`Launcher`], [`ProcessLauncher`]             |
//! | **Configuration** | Defaults plus `FLEET_*` environment overrides            | [`FleetConfig`], [`WorkerConfig`]             |
//! | **Errors**        | Typed errors with stable labels                          | [`RuntimeError`], [`WorkerError`]             |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use fleetvisor::{
//!     FleetConfig, LogWriter, ProcessLauncher, ServiceContext, ServiceFn, Subscribe, Supervisor,
//!     WorkerConfig, WorkerRuntime, is_worker_process,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     if is_worker_process() {
//!         fleetvisor::init_worker_tracing();
//!         let runtime = WorkerRuntime::stdio(WorkerConfig::from_env()?);
//!         let exit = runtime
//!             .run(ServiceFn::new("hello", |ctx: ServiceContext| async move {
//!                 ctx.relay.emit("hello:ready", serde_json::json!({ "slot": ctx.slot }));
//!                 Ok(())
//!             }))
//!             .await;
//!         std::process::exit(exit.code);
//!     }
//!
//!     fleetvisor::init_tracing();
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!     let supervisor = Supervisor::builder(FleetConfig::from_env()?, Arc::new(ProcessLauncher::current_exe()?))
//!         .with_subscribers(subs)
//!         .build()?;
//!     supervisor.run().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod policies;
mod protocol;
mod relay;
mod subscribers;
mod telemetry;
mod worker;

// ---- Public re-exports ----

pub use config::{FleetConfig, WORKER_SLOT_ENV, WorkerConfig, is_worker_process};
pub use core::{
    CommandSender, FleetSnapshot, HealthRecord, Inbox, Launcher, ProcessLauncher, SlotId,
    SlotSnapshot, SlotState, Supervisor, SupervisorBuilder, SupervisorHandle, WorkerExitStatus,
    WorkerMetrics, WorkerProcess, wait_for_shutdown_signal,
};
pub use error::{ConfigError, ProtocolError, RuntimeError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy, ThresholdBoundary};
pub use protocol::{
    MAX_FRAME_BYTES, MemoryUsage, SupervisorCommand, WorkerMessage, decode_command,
    decode_worker_message, encode_command, encode_worker_message,
};
pub use relay::{
    ERROR_EVENT, EventRelay, FleetEvent, ListenerFailure, ListenerFn, ListenerId, WrappedListener,
    wrap_listener,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use telemetry::{init_tracing, init_worker_tracing};
pub use worker::{
    FatalHandle, FatalReport, Service, ServiceContext, ServiceFn, ShutdownCause, WorkerExit,
    WorkerRuntime,
};
