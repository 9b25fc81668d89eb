//! # ProcessLauncher: workers as child OS processes.
//!
//! Each launch starts `program` with `FLEET_WORKER_SLOT=<slot>`, stdin and
//! stdout piped for the control channel and stderr inherited for logs.
//! Three tasks serve one child:
//!
//! - **writer**: `SupervisorCommand`s → stdin (dropping every sender closes stdin)
//! - **reader**: stdout lines → `Inbox::message`
//! - **waiter**: waits for exit (or kills on request), lets the reader finish,
//!   then sends `Inbox::exited` exactly once

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;

use crate::config::WORKER_SLOT_ENV;
use crate::core::SlotId;
use crate::core::launcher::{Inbox, Launcher, WorkerExitStatus, WorkerProcess};
use crate::error::RuntimeError;
use crate::protocol::{
    SupervisorCommand, decode_worker_message, encode_command, framed_lines, write_frame,
};

/// How long the waiter lets the reader drain stdout after the child exited.
const READER_FLUSH: Duration = Duration::from_millis(500);

/// Launches workers by running a program.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-runs the current executable as the worker.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(
        &self,
        slot: SlotId,
        generation: u64,
        inbox: Inbox,
    ) -> Result<WorkerProcess, RuntimeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(WORKER_SLOT_ENV, slot.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|source| RuntimeError::Spawn { slot, source })?;
        let pid = child.id().unwrap_or_default();

        let (commands, rx) = mpsc::unbounded_channel();
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(command_writer(stdin, rx, slot));
        }
        let reader = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(message_reader(stdout, slot, generation, inbox.clone())));

        let kill = CancellationToken::new();
        tokio::spawn(waiter(child, kill.clone(), reader, slot, generation, inbox));

        tracing::debug!(slot, pid, generation, program = %self.program.display(), "worker process started");
        Ok(WorkerProcess {
            pid,
            commands,
            kill,
        })
    }
}

async fn command_writer(
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<SupervisorCommand>,
    slot: SlotId,
) {
    while let Some(cmd) = rx.recv().await {
        let line = match encode_command(&cmd) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(slot, error = %err, "cannot encode command");
                continue;
            }
        };
        if let Err(err) = write_frame(&mut stdin, &line).await {
            tracing::debug!(slot, error = %err, "worker stdin closed");
            return;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn message_reader(stdout: ChildStdout, slot: SlotId, generation: u64, inbox: Inbox) {
    let mut lines = framed_lines(stdout);
    while let Some(frame) = lines.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                tracing::warn!(slot, "oversized worker frame skipped");
                continue;
            }
            Err(LinesCodecError::Io(err)) => {
                tracing::debug!(slot, error = %err, "worker stdout closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match decode_worker_message(&line) {
            Ok(msg) => inbox.message(slot, generation, msg),
            Err(err) => {
                tracing::warn!(slot, error = %err, label = err.as_label(), "undecodable worker frame skipped");
            }
        }
    }
}

async fn waiter(
    mut child: Child,
    kill: CancellationToken,
    reader: Option<JoinHandle<()>>,
    slot: SlotId,
    generation: u64,
    inbox: Inbox,
) {
    let waited = tokio::select! {
        res = child.wait() => res,
        _ = kill.cancelled() => {
            if let Err(err) = child.start_kill() {
                tracing::warn!(slot, error = %err, "kill failed");
            }
            child.wait().await
        }
    };
    if let Some(reader) = reader {
        let _ = tokio::time::timeout(READER_FLUSH, reader).await;
    }
    let status = match waited {
        Ok(status) => WorkerExitStatus::from(status),
        Err(err) => {
            tracing::warn!(slot, error = %err, "cannot reap worker");
            WorkerExitStatus::default()
        }
    };
    inbox.exited(slot, generation, status);
}
