//! # Lifecycle events emitted by the supervisor.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Worker events**: spawn, exit, heartbeat, health, reported errors
//! - **Restart events**: scheduled respawns, exhausted slots, emergency restarts
//! - **Shutdown events**: requested, completed within grace, grace exceeded
//! - **Subscriber events**: overflow and panics inside event consumers
//!
//! The [`Event`] struct carries additional metadata such as timestamps, slot,
//! pid, restart counters, exit status and backoff delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use fleetvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RestartScheduled)
//!     .with_slot(2)
//!     .with_restart_count(1)
//!     .with_delay(Duration::from_secs(5));
//!
//! assert_eq!(ev.kind, EventKind::RestartScheduled);
//! assert_eq!(ev.slot, Some(2));
//! assert_eq!(ev.delay_ms, Some(5000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::core::SlotId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `reason`: subscriber name and panic message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `reason`: subscriber name and drop reason ("full", "closed")
    SubscriberOverflow,

    // === Worker events ===
    /// A worker process was started for a slot.
    ///
    /// Sets:
    /// - `slot`, `pid`, `restart_count`
    WorkerSpawned,

    /// Launching a worker process failed.
    ///
    /// Sets:
    /// - `slot`, `reason`
    SpawnFailed,

    /// A worker process terminated.
    ///
    /// Sets:
    /// - `slot`, `pid`
    /// - `exit_code` and/or `signal`
    WorkerExited,

    /// A heartbeat arrived from a worker.
    ///
    /// Sets:
    /// - `slot`, `pid`
    HeartbeatReceived,

    /// A worker reported a fatal error before exiting.
    ///
    /// Sets:
    /// - `slot`, `pid`, `reason`
    WorkerReportedError,

    /// A worker missed its heartbeat deadline and is being terminated.
    ///
    /// Sets:
    /// - `slot`, `pid`, `delay_ms` (silence in ms)
    WorkerUnhealthy,

    // === Restart events ===
    /// A respawn of a slot is scheduled.
    ///
    /// Sets:
    /// - `slot`, `restart_count` (after increment), `delay_ms`
    RestartScheduled,

    /// A slot used its whole restart budget and will not be respawned.
    ///
    /// Sets:
    /// - `slot`, `restart_count`
    SlotExhausted,

    /// The fleet crossed the degradation threshold and is restarting wholesale.
    ///
    /// Sets:
    /// - `delay_ms` (wait before the full respawn), `reason`
    EmergencyRestart,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or handle).
    ShutdownRequested,

    /// All workers stopped within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; stragglers were force-killed.
    ///
    /// Sets:
    /// - `reason`: stuck slots
    GraceExceeded,
}

impl EventKind {
    /// Stable snake_case label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::SubscriberPanicked => "subscriber_panicked",
            EventKind::SubscriberOverflow => "subscriber_overflow",
            EventKind::WorkerSpawned => "worker_spawned",
            EventKind::SpawnFailed => "spawn_failed",
            EventKind::WorkerExited => "worker_exited",
            EventKind::HeartbeatReceived => "heartbeat_received",
            EventKind::WorkerReportedError => "worker_reported_error",
            EventKind::WorkerUnhealthy => "worker_unhealthy",
            EventKind::RestartScheduled => "restart_scheduled",
            EventKind::SlotExhausted => "slot_exhausted",
            EventKind::EmergencyRestart => "emergency_restart",
            EventKind::ShutdownRequested => "shutdown_requested",
            EventKind::AllStoppedWithin => "all_stopped_within",
            EventKind::GraceExceeded => "grace_exceeded",
        }
    }
}

/// Supervisor event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Slot the event refers to.
    pub slot: Option<SlotId>,
    /// OS process id of the worker.
    pub pid: Option<u32>,
    /// Slot restart counter at the time of the event.
    pub restart_count: Option<u32>,
    /// Delay in milliseconds (backoff, silence).
    pub delay_ms: Option<u64>,
    /// Process exit code, if it exited normally.
    pub exit_code: Option<i32>,
    /// Terminating signal name, if it was killed.
    pub signal: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            slot: None,
            pid: None,
            restart_count: None,
            delay_ms: None,
            exit_code: None,
            signal: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_slot(mut self, slot: SlotId) -> Self {
        self.slot = Some(slot);
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[inline]
    pub fn with_restart_count(mut self, n: u32) -> Self {
        self.restart_count = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Attaches the exit status of a worker process.
    #[inline]
    pub fn with_exit(mut self, code: Option<i32>, signal: Option<&str>) -> Self {
        self.exit_code = code;
        self.signal = signal.map(Arc::from);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}
