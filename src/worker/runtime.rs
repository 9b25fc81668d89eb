//! # Worker process runtime.
//!
//! [`WorkerRuntime`] hosts one [`Service`] inside a worker process and speaks
//! the control channel with the supervisor.
//!
//! ## Architecture
//! ```text
//!            stdin ──► reader ──┬─► "shutdown" ──────────────┐
//!                               └─► FLEET_EVENT ─► relay      │
//!                                                             ▼
//! Service::start ── Err / panic ──► FatalHandle ──► run() select ──► drain ──► exit code
//!                                                             ▲
//!                                        OS signal ───────────┘
//!
//! heartbeat ─┐
//! relay.emit ├──► outbound queue ──► writer ──► stdout
//! error frame┘
//! ```
//!
//! ## Shutdown path
//! 1. The first of: `"shutdown"` command, stdin EOF, OS signal, fatal report.
//! 2. A fatal report is sent upward as `{"type":"error"}` before anything else.
//! 3. `ServiceContext::shutdown` is cancelled and heartbeats stop.
//! 4. `Service::drained` is awaited for at most `drain_timeout`.
//! 5. Queued frames are flushed for at most 500ms and the exit code is returned.
//!
//! A fatal error raised during the drain is reported once and turns the exit
//! code into 1; it does not restart the sequence.

use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::core::wait_for_shutdown_signal;
use crate::error::WorkerError;
use crate::protocol::{
    SupervisorCommand, WorkerMessage, decode_command, encode_worker_message, framed_lines,
    write_frame,
};
use crate::relay::EventRelay;
use crate::subscribers::panic_message;
use crate::worker::fatal::{FatalHandle, FatalReport, install_panic_hook};
use crate::worker::health::sample_memory;
use crate::worker::service::{Service, ServiceContext};

/// Upper bound for flushing queued frames once the drain is over.
const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// What started the shutdown path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The supervisor sent `"shutdown"`.
    Command,
    /// The control channel reached EOF.
    ChannelClosed,
    /// The process received a termination signal.
    Signal,
    /// A fatal error was trapped.
    Fatal,
}

/// Outcome of [`WorkerRuntime::run`].
#[derive(Debug)]
pub struct WorkerExit {
    pub cause: ShutdownCause,
    /// Process exit code: 0 after a clean shutdown, 1 otherwise.
    pub code: i32,
    /// The failure behind a non-zero code.
    pub error: Option<WorkerError>,
}

/// Runtime for one worker process.
pub struct WorkerRuntime<R, W> {
    cfg: WorkerConfig,
    reader: R,
    writer: W,
    relay: EventRelay,
    fatal: FatalHandle,
    fatal_rx: mpsc::UnboundedReceiver<FatalReport>,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    outbound_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    listen_os_signals: bool,
}

impl WorkerRuntime<tokio::io::Stdin, tokio::io::Stdout> {
    /// Runtime bound to the process's stdin/stdout, reacting to OS signals.
    pub fn stdio(cfg: WorkerConfig) -> Self {
        Self::new(cfg, tokio::io::stdin(), tokio::io::stdout()).listen_os_signals(true)
    }
}

impl<R, W> WorkerRuntime<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Runtime over arbitrary streams. OS signals are ignored unless enabled.
    pub fn new(cfg: WorkerConfig, reader: R, writer: W) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (fatal, fatal_rx) = FatalHandle::new();
        let relay = EventRelay::upstream(cfg.origin_id(), outbound.clone());
        Self {
            cfg,
            reader,
            writer,
            relay,
            fatal,
            fatal_rx,
            outbound,
            outbound_rx,
            listen_os_signals: false,
        }
    }

    /// Treat SIGINT/SIGTERM/SIGQUIT like a `"shutdown"` command.
    pub fn listen_os_signals(mut self, on: bool) -> Self {
        self.listen_os_signals = on;
        self
    }

    /// The relay of this process; listeners may be registered before `run`.
    pub fn relay(&self) -> EventRelay {
        self.relay.clone()
    }

    /// Entry point into the fatal path, usable before `run`.
    pub fn fatal_handle(&self) -> FatalHandle {
        self.fatal.clone()
    }

    /// Starts `service` and runs until the shutdown path completes.
    pub async fn run<S: Service>(self, service: S) -> WorkerExit {
        let Self {
            cfg,
            reader,
            writer,
            relay,
            fatal,
            mut fatal_rx,
            outbound,
            outbound_rx,
            listen_os_signals,
        } = self;

        if cfg.trap_panics {
            install_panic_hook(fatal.clone());
        }

        let pid = std::process::id();
        let started = Instant::now();
        let service = Arc::new(service);
        let shutdown = CancellationToken::new();
        let stop_io = CancellationToken::new();

        let writer_task = tokio::spawn(write_loop(writer, outbound_rx, stop_io.clone()));
        let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_loop(reader, relay.clone(), ctrl_tx));
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            cfg.heartbeat_interval,
            pid,
            started,
            outbound.clone(),
            shutdown.clone(),
        ));

        let ctx = ServiceContext {
            slot: cfg.slot,
            shutdown: shutdown.clone(),
            relay: relay.clone(),
            fatal: fatal.clone(),
        };
        let start_task = spawn_start(Arc::clone(&service), ctx, fatal.clone());
        tracing::info!(slot = ?cfg.slot, pid, service = service.name(), "worker starting");

        let signal = async move {
            if !listen_os_signals {
                return std::future::pending::<&'static str>().await;
            }
            match wait_for_shutdown_signal().await {
                Ok(name) => name,
                Err(err) => {
                    tracing::warn!(error = %err, "cannot install signal handlers");
                    std::future::pending::<&'static str>().await
                }
            }
        };
        tokio::pin!(signal);

        let mut failure: Option<WorkerError> = None;
        let cause = tokio::select! {
            Some(report) = fatal_rx.recv() => {
                send_error(&outbound, pid, &report);
                failure = Some(WorkerError::Fatal { error: report.error, stack: report.stack });
                ShutdownCause::Fatal
            }
            cause = ctrl_rx.recv() => cause.unwrap_or(ShutdownCause::ChannelClosed),
            name = &mut signal => {
                tracing::info!(signal = name, "termination signal received");
                ShutdownCause::Signal
            }
        };
        tracing::info!(?cause, "worker shutting down");

        shutdown.cancel();
        let drain = tokio::time::timeout(cfg.drain_timeout, service.drained());
        tokio::pin!(drain);
        loop {
            tokio::select! {
                res = &mut drain => {
                    if res.is_err() {
                        tracing::warn!(timeout = ?cfg.drain_timeout, "drain timed out");
                        failure.get_or_insert(WorkerError::DrainTimeout { timeout: cfg.drain_timeout });
                    }
                    break;
                }
                Some(report) = fatal_rx.recv() => {
                    send_error(&outbound, pid, &report);
                    failure.get_or_insert(WorkerError::Fatal { error: report.error, stack: report.stack });
                }
            }
        }

        if start_task.is_finished() {
            if let Ok(Some(err)) = start_task.await {
                failure = Some(err);
            }
        } else {
            start_task.abort();
        }
        heartbeat_task.abort();
        reader_task.abort();
        stop_io.cancel();
        drop(outbound);
        match tokio::time::timeout(FLUSH_TIMEOUT, writer_task).await {
            Ok(Ok(Err(io))) => {
                let err = WorkerError::Channel(io);
                tracing::warn!(error = %err, label = err.as_label(), "control channel lost");
            }
            Ok(_) => {}
            Err(_) => tracing::warn!("control channel flush timed out"),
        }

        let code = if failure.is_some() { 1 } else { 0 };
        tracing::info!(?cause, code, "worker stopped");
        WorkerExit {
            cause,
            code,
            error: failure,
        }
    }
}

/// Runs `Service::start`; yields the service error if it was the fatal one.
fn spawn_start<S: Service>(
    service: Arc<S>,
    ctx: ServiceContext,
    fatal: FatalHandle,
) -> JoinHandle<Option<WorkerError>> {
    tokio::spawn(async move {
        let outcome = std::panic::AssertUnwindSafe(service.start(ctx))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {
                tracing::info!(service = service.name(), "service ready");
                None
            }
            Ok(Err(err)) => {
                let failure = WorkerError::service(&err);
                tracing::error!(service = service.name(), error = %failure, label = failure.as_label(), "service failed to start");
                fatal.report_error(&err).then_some(failure)
            }
            Err(panic) => {
                fatal.report(
                    format!("service panicked: {}", panic_message(&*panic)),
                    None,
                );
                None
            }
        }
    })
}

fn send_error(outbound: &mpsc::UnboundedSender<WorkerMessage>, pid: u32, report: &FatalReport) {
    let _ = outbound.send(WorkerMessage::Error {
        error: report.error.clone(),
        stack: report.stack.clone(),
        pid,
    });
}

async fn read_loop<R>(
    reader: R,
    relay: EventRelay,
    ctrl: mpsc::UnboundedSender<ShutdownCause>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = framed_lines(reader);
    while let Some(frame) = lines.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                tracing::warn!("oversized control frame skipped");
                continue;
            }
            Err(LinesCodecError::Io(err)) => {
                tracing::warn!(error = %err, "control channel read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match decode_command(&line) {
            Ok(SupervisorCommand::Shutdown) => {
                let _ = ctrl.send(ShutdownCause::Command);
                return;
            }
            Ok(SupervisorCommand::FleetEvent(event)) => {
                tracing::debug!(event_id = %event.event_id, event_type = %event.kind, "relayed event received");
                relay.deliver_local(&event);
            }
            Err(err) => {
                tracing::warn!(error = %err, label = err.as_label(), "undecodable control frame skipped");
            }
        }
    }
    let _ = ctrl.send(ShutdownCause::ChannelClosed);
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<WorkerMessage>,
    stop: CancellationToken,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let msg = tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = stop.cancelled() => {
                while let Ok(msg) = rx.try_recv() {
                    write_message(&mut writer, &msg).await?;
                }
                break;
            }
        };
        write_message(&mut writer, &msg).await?;
    }
    writer.shutdown().await
}

async fn write_message<W>(writer: &mut W, msg: &WorkerMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match encode_worker_message(msg) {
        Ok(line) => write_frame(writer, &line).await,
        Err(err) => {
            tracing::warn!(error = %err, "cannot encode control frame");
            Ok(())
        }
    }
}

async fn heartbeat_loop(
    every: std::time::Duration,
    pid: u32,
    started: Instant,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let msg = WorkerMessage::Health {
                    pid,
                    memory: sample_memory(),
                    uptime: started.elapsed().as_secs_f64(),
                };
                if outbound.send(msg).is_err() {
                    return;
                }
            }
        }
    }
}
