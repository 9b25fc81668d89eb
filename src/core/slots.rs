//! # Slot table: the supervisor's view of the pool.
//!
//! A fixed arena of `pool_size` slots indexed by [`SlotId`]. Only the
//! supervisor loop touches it, so nothing here is synchronized.
//!
//! ```text
//!            spawn            first heartbeat
//! Restarting ─────► Starting ────────────────► Running
//!     ▲                 │                          │
//!     │   crash, budget │ left          crash /    │ unhealthy
//!     └─────────────────┴──────────────────────────┘
//!                       │ budget used up
//!                       ▼
//!                   Exhausted ──(emergency reset)──► Restarting
//! ```
//!
//! Rules:
//! - At most one [`WorkerRecord`] per slot, so never more records than slots.
//! - `restart_count` lives on the slot and survives worker replacement.
//! - A [`HealthRecord`] exists only between the first heartbeat and the exit.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::launcher::CommandSender;
use crate::policies::RestartPolicy;
use crate::protocol::MemoryUsage;

/// Index of a worker slot in the pool (`0..pool_size`).
pub type SlotId = usize;

/// Lifecycle state of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Process launched, no heartbeat yet.
    Starting,
    /// Heartbeats are arriving.
    Running,
    /// No process; a respawn is pending.
    Restarting,
    /// Restart budget used up; never respawned until an emergency reset.
    Exhausted,
    /// The fleet is shut down.
    Stopped,
}

/// A live worker process.
#[derive(Debug)]
pub(crate) struct WorkerRecord {
    pub pid: u32,
    pub start_time: Instant,
    pub generation: u64,
    pub commands: CommandSender,
    pub kill: CancellationToken,
}

/// What the worker last reported about itself.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WorkerMetrics {
    pub memory: MemoryUsage,
    /// Seconds since the worker runtime started.
    pub uptime: f64,
}

/// Heartbeat bookkeeping of a live worker.
#[derive(Clone, Debug)]
pub struct HealthRecord {
    pub worker_id: SlotId,
    pub last_heartbeat_at: Instant,
    pub reported_metrics: WorkerMetrics,
}

/// Result of charging a crash to a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CrashOutcome {
    /// Budget left; `restart_count` is the incremented value.
    Restart { restart_count: u32 },
    /// The slot is exhausted at `restart_count`.
    Exhausted { restart_count: u32 },
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    restart_count: u32,
    worker: Option<WorkerRecord>,
    health: Option<HealthRecord>,
    unhealthy: bool,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: SlotState::Restarting,
            restart_count: 0,
            worker: None,
            health: None,
            unhealthy: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: Vec<Slot>,
    generation: u64,
}

impl SlotTable {
    pub fn new(pool_size: usize) -> Self {
        Self {
            slots: (0..pool_size).map(|_| Slot::new()).collect(),
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Allocates a fresh generation number for the next launch.
    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn state(&self, slot: SlotId) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    pub fn restart_count(&self, slot: SlotId) -> u32 {
        self.slots.get(slot).map_or(0, |s| s.restart_count)
    }

    pub fn worker(&self, slot: SlotId) -> Option<&WorkerRecord> {
        self.slots.get(slot).and_then(|s| s.worker.as_ref())
    }

    /// Returns `true` if `generation` is the live worker of `slot`.
    pub fn is_current(&self, slot: SlotId, generation: u64) -> bool {
        self.worker(slot).is_some_and(|w| w.generation == generation)
    }

    pub fn insert_worker(&mut self, slot: SlotId, record: WorkerRecord) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.state = SlotState::Starting;
            s.worker = Some(record);
            s.health = None;
            s.unhealthy = false;
        }
    }

    /// Drops the worker and health records of `slot`.
    ///
    /// Returns the record and whether it had been declared unhealthy.
    pub fn remove_worker(&mut self, slot: SlotId) -> Option<(WorkerRecord, bool)> {
        let s = self.slots.get_mut(slot)?;
        let record = s.worker.take()?;
        s.health = None;
        let unhealthy = std::mem::take(&mut s.unhealthy);
        if matches!(s.state, SlotState::Starting | SlotState::Running) {
            s.state = SlotState::Restarting;
        }
        Some((record, unhealthy))
    }

    /// Records a heartbeat. Returns `true` for the first one of this worker.
    pub fn record_heartbeat(&mut self, slot: SlotId, at: Instant, metrics: WorkerMetrics) -> bool {
        let Some(s) = self.slots.get_mut(slot) else {
            return false;
        };
        if s.worker.is_none() {
            return false;
        }
        if s.state == SlotState::Starting {
            s.state = SlotState::Running;
        }
        match &mut s.health {
            Some(h) => {
                h.last_heartbeat_at = at;
                h.reported_metrics = metrics;
                false
            }
            None => {
                s.health = Some(HealthRecord {
                    worker_id: slot,
                    last_heartbeat_at: at,
                    reported_metrics: metrics,
                });
                true
            }
        }
    }

    pub fn health(&self, slot: SlotId) -> Option<&HealthRecord> {
        self.slots.get(slot).and_then(|s| s.health.as_ref())
    }

    /// Charges a crash to `slot` against the policy's restart budget.
    pub fn register_crash(&mut self, slot: SlotId, policy: &RestartPolicy) -> CrashOutcome {
        let Some(s) = self.slots.get_mut(slot) else {
            return CrashOutcome::Exhausted { restart_count: 0 };
        };
        if policy.allows_restart(s.restart_count) {
            s.restart_count += 1;
            s.state = SlotState::Restarting;
            CrashOutcome::Restart {
                restart_count: s.restart_count,
            }
        } else {
            s.state = SlotState::Exhausted;
            CrashOutcome::Exhausted {
                restart_count: s.restart_count,
            }
        }
    }

    /// Slots with a running process. Slots waiting out a backoff do not count.
    pub fn live_count(&self) -> usize {
        self.live_workers().count()
    }

    /// Zeroes every restart counter and makes every slot respawnable.
    pub fn reset_all(&mut self) {
        for s in &mut self.slots {
            s.restart_count = 0;
            s.state = SlotState::Restarting;
        }
    }

    pub fn mark_all_stopped(&mut self) {
        for s in &mut self.slots {
            s.state = SlotState::Stopped;
        }
    }

    /// Workers silent for longer than `timeout`, each reported once per silence episode.
    ///
    /// Silence is measured from the last heartbeat, or from the launch when no
    /// heartbeat arrived yet. Returned workers are marked unhealthy.
    pub fn stale_workers(&mut self, now: Instant, timeout: Duration) -> Vec<(SlotId, u32, Duration)> {
        let mut stale = Vec::new();
        for (slot, s) in self.slots.iter_mut().enumerate() {
            let Some(worker) = &s.worker else { continue };
            if s.unhealthy {
                continue;
            }
            let last = s
                .health
                .as_ref()
                .map_or(worker.start_time, |h| h.last_heartbeat_at);
            let silence = now.saturating_duration_since(last);
            if silence > timeout {
                s.unhealthy = true;
                stale.push((slot, worker.pid, silence));
            }
        }
        stale
    }

    pub fn live_workers(&self) -> impl Iterator<Item = (SlotId, &WorkerRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| s.worker.as_ref().map(|w| (slot, w)))
    }

    pub fn live_slots(&self) -> Vec<SlotId> {
        self.live_workers().map(|(slot, _)| slot).collect()
    }

    pub fn has_live_workers(&self) -> bool {
        self.slots.iter().any(|s| s.worker.is_some())
    }

    pub fn snapshot(&self, now: Instant) -> FleetSnapshot {
        let slots = self
            .slots
            .iter()
            .enumerate()
            .map(|(slot, s)| SlotSnapshot {
                slot,
                state: s.state,
                pid: s.worker.as_ref().map(|w| w.pid),
                restart_count: s.restart_count,
                since_heartbeat: s
                    .health
                    .as_ref()
                    .map(|h| now.saturating_duration_since(h.last_heartbeat_at)),
                metrics: s.health.as_ref().map(|h| h.reported_metrics),
            })
            .collect();
        FleetSnapshot {
            pool_size: self.slots.len(),
            slots,
        }
    }
}

/// Point-in-time view of one slot.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotSnapshot {
    pub slot: SlotId,
    pub state: SlotState,
    pub pid: Option<u32>,
    pub restart_count: u32,
    /// Age of the last heartbeat.
    pub since_heartbeat: Option<Duration>,
    pub metrics: Option<WorkerMetrics>,
}

/// Point-in-time view of the pool, see [`SupervisorHandle::snapshot`](crate::SupervisorHandle::snapshot).
#[derive(Clone, Debug, PartialEq)]
pub struct FleetSnapshot {
    pub pool_size: usize,
    pub slots: Vec<SlotSnapshot>,
}

impl FleetSnapshot {
    /// Number of slots with a live worker process.
    pub fn live_workers(&self) -> usize {
        self.slots.iter().filter(|s| s.pid.is_some()).count()
    }

    pub fn slot(&self, slot: SlotId) -> Option<&SlotSnapshot> {
        self.slots.get(slot)
    }

    pub fn count_in(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }
}
