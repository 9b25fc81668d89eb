//! # Launcher: how worker processes come to exist.
//!
//! The supervisor never touches OS processes directly. It asks a [`Launcher`]
//! for a [`WorkerProcess`] and learns about everything that happens to it
//! through the [`Inbox`] it handed over:
//!
//! ```text
//! Supervisor ── launch(slot, generation, inbox) ──► Launcher
//!     ▲                                               │
//!     │                 WorkerProcess { pid, commands, kill }
//!     │                                               │
//!     └──── Inbox::message(..) / Inbox::exited(..) ◄──┘ (reader / waiter tasks)
//! ```
//!
//! Every report carries the `generation` of the launch, so late reports about
//! a replaced worker are recognised and dropped.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::SlotId;
use crate::core::supervisor::Input;
use crate::error::RuntimeError;
use crate::protocol::{SupervisorCommand, WorkerMessage};

/// Sending half of a worker's command channel.
pub type CommandSender = mpsc::UnboundedSender<SupervisorCommand>;

/// How a worker process ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerExitStatus {
    /// Exit code, if the process exited on its own.
    pub code: Option<i32>,
    /// Signal number, if the process was killed by one.
    pub signal: Option<i32>,
}

impl WorkerExitStatus {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// `SIGKILL`-style name of the terminating signal.
    pub fn signal_name(&self) -> Option<String> {
        self.signal.map(signal_name)
    }
}

impl From<std::process::ExitStatus> for WorkerExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

#[cfg(unix)]
fn signal_name(signo: i32) -> String {
    match nix::sys::signal::Signal::try_from(signo) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("SIG{signo}"),
    }
}

#[cfg(not(unix))]
fn signal_name(signo: i32) -> String {
    format!("SIG{signo}")
}

/// Handles of one launched worker.
#[derive(Debug)]
pub struct WorkerProcess {
    pub pid: u32,
    /// Commands written to the worker's control channel, in order.
    pub commands: CommandSender,
    /// Cancel to force-kill the process.
    pub kill: CancellationToken,
}

/// Where launchers report worker activity.
#[derive(Clone, Debug)]
pub struct Inbox {
    tx: mpsc::UnboundedSender<Input>,
}

impl Inbox {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { tx }
    }

    /// Reports that the worker process of `slot`/`generation` has ended.
    ///
    /// Must be sent exactly once per launched process, after its last message.
    pub fn exited(&self, slot: SlotId, generation: u64, status: WorkerExitStatus) {
        let _ = self.tx.send(Input::Exited {
            slot,
            generation,
            status,
        });
    }

    /// Hands a decoded control-channel frame to the supervisor.
    pub fn message(&self, slot: SlotId, generation: u64, message: WorkerMessage) {
        let _ = self.tx.send(Input::Message {
            slot,
            generation,
            message,
        });
    }
}

/// Starts worker processes for the supervisor.
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// Starts the worker for `slot`.
    async fn launch(
        &self,
        slot: SlotId,
        generation: u64,
        inbox: Inbox,
    ) -> Result<WorkerProcess, RuntimeError>;
}
