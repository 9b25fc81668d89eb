//! # Worker side of the fleet.
//!
//! - [`Service`] / [`ServiceFn`] the hosted service and its start entry point
//! - [`WorkerRuntime`] control channel, heartbeats, fatal trap, drain-then-exit
//! - [`FatalHandle`] once-only fatal error reporting

mod fatal;
mod health;
mod runtime;
mod service;

pub use fatal::{FatalHandle, FatalReport};
pub use runtime::{ShutdownCause, WorkerExit, WorkerRuntime};
pub use service::{Service, ServiceContext, ServiceFn};
