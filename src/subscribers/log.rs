//! # LogWriter: lifecycle events as structured log lines
//!
//! A minimal subscriber that renders incoming [`Event`]s through `tracing`
//! under the `fleetvisor::events` target.
//!
//! ## Example output
//! ```text
//! INFO fleetvisor::events: worker spawned slot=0 pid=4242 restart_count=0
//! WARN fleetvisor::events: worker exited slot=0 pid=4242 code=Some(1) signal=None
//! INFO fleetvisor::events: restart scheduled slot=0 restart_count=1 delay_ms=5000
//! ERROR fleetvisor::events: slot exhausted slot=0 restart_count=5
//! WARN fleetvisor::events: emergency restart delay_ms=10000
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
///
/// Heartbeats are skipped unless enabled with [`LogWriter::with_heartbeats`].
#[derive(Debug, Default)]
pub struct LogWriter {
    heartbeats: bool,
}

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log every heartbeat, at `trace` level.
    #[must_use]
    pub fn with_heartbeats(mut self, on: bool) -> Self {
        self.heartbeats = on;
        self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    fn accepts(&self, kind: EventKind) -> bool {
        self.heartbeats || kind != EventKind::HeartbeatReceived
    }

    async fn on_event(&self, e: &Event) {
        let slot = e.slot;
        let pid = e.pid;
        match e.kind {
            EventKind::WorkerSpawned => {
                tracing::info!(target: "fleetvisor::events", ?slot, ?pid, restart_count = ?e.restart_count, "worker spawned");
            }
            EventKind::SpawnFailed => {
                tracing::error!(target: "fleetvisor::events", ?slot, reason = ?e.reason, "spawn failed");
            }
            EventKind::WorkerExited => {
                tracing::warn!(target: "fleetvisor::events", ?slot, ?pid, code = ?e.exit_code, signal = ?e.signal, "worker exited");
            }
            EventKind::HeartbeatReceived => {
                tracing::trace!(target: "fleetvisor::events", ?slot, ?pid, "heartbeat");
            }
            EventKind::WorkerReportedError => {
                tracing::error!(target: "fleetvisor::events", ?slot, ?pid, reason = ?e.reason, "worker reported error");
            }
            EventKind::WorkerUnhealthy => {
                tracing::warn!(target: "fleetvisor::events", ?slot, ?pid, silent_ms = ?e.delay_ms, "worker unhealthy");
            }
            EventKind::RestartScheduled => {
                tracing::info!(target: "fleetvisor::events", ?slot, restart_count = ?e.restart_count, delay_ms = ?e.delay_ms, "restart scheduled");
            }
            EventKind::SlotExhausted => {
                tracing::error!(target: "fleetvisor::events", ?slot, restart_count = ?e.restart_count, "slot exhausted");
            }
            EventKind::EmergencyRestart => {
                tracing::warn!(target: "fleetvisor::events", delay_ms = ?e.delay_ms, reason = ?e.reason, "emergency restart");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: "fleetvisor::events", "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                tracing::info!(target: "fleetvisor::events", "all workers stopped within grace");
            }
            EventKind::GraceExceeded => {
                tracing::warn!(target: "fleetvisor::events", stuck = ?e.reason, "grace exceeded");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(target: "fleetvisor::events", reason = ?e.reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(target: "fleetvisor::events", reason = ?e.reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
