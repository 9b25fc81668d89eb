//! # Supervisor: owns the worker pool and applies the restart policy.
//!
//! The [`Supervisor`] is a single actor. Everything that happens to the fleet
//! reaches it as an [`Input`] on one inbox, and only its loop mutates the
//! [`SlotTable`], so no slot state is shared or locked.
//!
//! ## High-level architecture
//! ```text
//! Inputs:
//!   Launcher reader/waiter tasks ──► Inbox ──┐   Exited / Message
//!   respawn timers (tokio::spawn)  ──────────┤   Respawn / EmergencyRespawn
//!   SupervisorHandle               ──────────┤   Shutdown / Snapshot
//!                                            ▼
//!   OS signal ─────────────────────────► run() loop ◄──── health tick
//!                                            │
//!             ┌──────────────────────────────┼───────────────────────────┐
//!             ▼                              ▼                           ▼
//!     on_worker_exit ─► on_crash      on_message                  graceful_shutdown
//!        ├─ budget left: RestartScheduled, timer ─► Respawn         ├─ "shutdown" to all
//!        └─ exhausted: SlotExhausted ─► check_fleet_health          ├─ wait ≤ grace
//!                                        └─ degraded: emergency     └─ kill stragglers
//!
//! Observability:
//!   every step ── publish(Event) ──► Bus ──► listener ──► SubscriberSet ──► LogWriter, ...
//! ```
//!
//! ## Rules
//! - A timer only ever sends an input; the loop re-checks the slot before acting.
//! - Emergency restarts bump an epoch, so respawn timers armed before it are void.
//! - Inputs from an earlier generation of a slot are ignored.
//! - Graceful shutdown runs once; later requests are no-ops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;
use crate::core::SlotId;
use crate::core::builder::SupervisorBuilder;
use crate::core::launcher::{Inbox, Launcher, WorkerExitStatus};
use crate::core::shutdown::wait_for_shutdown_signal;
use crate::core::slots::{CrashOutcome, FleetSnapshot, SlotState, SlotTable, WorkerMetrics, WorkerRecord};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::protocol::{SupervisorCommand, WorkerMessage};
use crate::relay::{EventRelay, FleetEvent};
use crate::subscribers::SubscriberSet;

/// Everything the supervisor loop reacts to.
#[derive(Debug)]
pub(crate) enum Input {
    Exited {
        slot: SlotId,
        generation: u64,
        status: WorkerExitStatus,
    },
    Message {
        slot: SlotId,
        generation: u64,
        message: WorkerMessage,
    },
    Respawn {
        slot: SlotId,
        epoch: u64,
    },
    EmergencyRespawn {
        epoch: u64,
    },
    Shutdown,
    Snapshot(oneshot::Sender<FleetSnapshot>),
}

/// Fleet supervisor. Build with [`Supervisor::builder`], then [`run`](Self::run).
pub struct Supervisor {
    cfg: FleetConfig,
    launcher: Arc<dyn Launcher>,
    bus: Bus,
    subs: Option<SubscriberSet>,
    relay: EventRelay,
    relay_rx: mpsc::UnboundedReceiver<FleetEvent>,
    inbox_tx: mpsc::UnboundedSender<Input>,
    inbox_rx: mpsc::UnboundedReceiver<Input>,
    slots: SlotTable,
    epoch: u64,
    shutdown_requested: bool,
    shutting_down: bool,
    listen_os_signals: bool,
}

impl Supervisor {
    /// Starts building a supervisor that launches workers through `launcher`.
    pub fn builder(cfg: FleetConfig, launcher: Arc<dyn Launcher>) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg, launcher)
    }

    pub(crate) fn new_internal(
        cfg: FleetConfig,
        launcher: Arc<dyn Launcher>,
        bus: Bus,
        subs: SubscriberSet,
        listen_os_signals: bool,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (relay, relay_rx) = EventRelay::fanout("supervisor");
        let slots = SlotTable::new(cfg.pool_size);
        Self {
            cfg,
            launcher,
            bus,
            subs: Some(subs),
            relay,
            relay_rx,
            inbox_tx,
            inbox_rx,
            slots,
            epoch: 0,
            shutdown_requested: false,
            shutting_down: false,
            listen_os_signals,
        }
    }

    /// A cloneable control handle, valid until `run` returns.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            inbox: self.inbox_tx.clone(),
            bus: self.bus.clone(),
            relay: self.relay.clone(),
        }
    }

    /// The supervisor-side event relay.
    pub fn relay(&self) -> EventRelay {
        self.relay.clone()
    }

    /// Spawns the whole pool and supervises it until shutdown.
    ///
    /// Returns `Ok(())` when every worker exited within the grace period, or
    /// [`RuntimeError::GraceExceeded`] when stragglers had to be killed.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        let stop_subs = CancellationToken::new();
        let listener = self.subscriber_listener(stop_subs.clone());

        tracing::info!(
            pool_size = self.cfg.pool_size,
            max_attempts = self.cfg.restart.max_attempts,
            "supervisor starting"
        );
        for slot in 0..self.slots.len() {
            self.spawn_worker(slot).await;
        }

        let every = self.cfg.health_check_interval;
        let mut health = tokio::time::interval_at(Instant::now() + every, every);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let listen = self.listen_os_signals;
        let signal = async move {
            if !listen {
                return std::future::pending::<&'static str>().await;
            }
            match wait_for_shutdown_signal().await {
                Ok(name) => name,
                Err(err) => {
                    let err = RuntimeError::Signal(err);
                    tracing::error!(error = %err, label = err.as_label(), "signal handlers unavailable");
                    std::future::pending::<&'static str>().await
                }
            }
        };
        tokio::pin!(signal);

        while !self.shutdown_requested {
            tokio::select! {
                name = &mut signal => {
                    tracing::info!(signal = name, "termination signal received");
                    self.shutdown_requested = true;
                }
                _ = health.tick() => self.run_health_check(),
                Some(event) = self.relay_rx.recv() => self.forward_to_workers(None, &event),
                input = self.inbox_rx.recv() => match input {
                    Some(input) => self.handle_input(input).await,
                    None => self.shutdown_requested = true,
                },
            }
        }

        let result = self.graceful_shutdown().await;
        stop_subs.cancel();
        let _ = listener.await;
        result
    }

    /// Subscribes to the bus and forwards events to the subscriber set until `stop`.
    fn subscriber_listener(&mut self, stop: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let set = self.subs.take();
        tokio::spawn(async move {
            let Some(set) = set else { return };
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => match msg {
                        Ok(ev) => set.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "event listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit(&ev);
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        })
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Exited {
                slot,
                generation,
                status,
            } => self.on_worker_exit(slot, generation, status).await,
            Input::Message {
                slot,
                generation,
                message,
            } => self.on_message(slot, generation, message),
            Input::Respawn { slot, epoch } => {
                if epoch != self.epoch || self.slots.state(slot) != Some(SlotState::Restarting) {
                    tracing::debug!(slot, epoch, "stale respawn ignored");
                    return;
                }
                self.spawn_worker(slot).await;
            }
            Input::EmergencyRespawn { epoch } => {
                if epoch != self.epoch {
                    return;
                }
                tracing::info!(pool_size = self.slots.len(), "respawning fleet after emergency restart");
                for slot in 0..self.slots.len() {
                    if self.slots.worker(slot).is_none() {
                        self.spawn_worker(slot).await;
                    }
                }
            }
            Input::Shutdown => self.shutdown_requested = true,
            Input::Snapshot(reply) => {
                let _ = reply.send(self.slots.snapshot(Instant::now()));
            }
        }
    }

    /// Launches the worker of `slot`, inheriting the slot's restart counter.
    async fn spawn_worker(&mut self, slot: SlotId) {
        if self.shutting_down {
            return;
        }
        let generation = self.slots.next_generation();
        let inbox = Inbox::new(self.inbox_tx.clone());
        match self.launcher.launch(slot, generation, inbox).await {
            Ok(process) => {
                let restart_count = self.slots.restart_count(slot);
                let pid = process.pid;
                self.slots.insert_worker(
                    slot,
                    WorkerRecord {
                        pid,
                        start_time: Instant::now(),
                        generation,
                        commands: process.commands,
                        kill: process.kill,
                    },
                );
                tracing::info!(slot, pid, restart_count, "worker spawned");
                self.bus.publish(
                    Event::new(EventKind::WorkerSpawned)
                        .with_slot(slot)
                        .with_pid(pid)
                        .with_restart_count(restart_count),
                );
            }
            Err(err) => {
                tracing::error!(slot, error = %err, label = err.as_label(), "worker spawn failed");
                self.bus.publish(
                    Event::new(EventKind::SpawnFailed)
                        .with_slot(slot)
                        .with_reason(err.to_string()),
                );
                self.on_crash(slot).await;
            }
        }
    }

    async fn on_worker_exit(&mut self, slot: SlotId, generation: u64, status: WorkerExitStatus) {
        if !self.slots.is_current(slot, generation) {
            tracing::debug!(slot, generation, "exit of a replaced worker ignored");
            return;
        }
        let last_heartbeat_ms = self
            .slots
            .health(slot)
            .map(|h| h.last_heartbeat_at.elapsed().as_millis() as u64);
        let Some((record, unhealthy)) = self.slots.remove_worker(slot) else {
            return;
        };
        let signal = status.signal_name();
        let reason = if unhealthy { "unhealthy" } else { "crash" };
        tracing::warn!(
            slot,
            pid = record.pid,
            code = ?status.code,
            signal = ?signal,
            reason,
            last_heartbeat_ms = ?last_heartbeat_ms,
            "worker exited"
        );
        self.bus.publish(
            Event::new(EventKind::WorkerExited)
                .with_slot(slot)
                .with_pid(record.pid)
                .with_exit(status.code, signal.as_deref())
                .with_reason(reason),
        );
        self.on_crash(slot).await;
    }

    /// Applies the restart policy to a slot that lost its worker.
    async fn on_crash(&mut self, slot: SlotId) {
        let policy = self.cfg.restart;
        match self.slots.register_crash(slot, &policy) {
            CrashOutcome::Restart { restart_count } => {
                let delay = policy.restart_delay(restart_count);
                tracing::info!(slot, restart_count, delay_ms = delay.as_millis() as u64, "restart scheduled");
                self.bus.publish(
                    Event::new(EventKind::RestartScheduled)
                        .with_slot(slot)
                        .with_restart_count(restart_count)
                        .with_delay(delay),
                );
                self.schedule(
                    Input::Respawn {
                        slot,
                        epoch: self.epoch,
                    },
                    delay,
                );
            }
            CrashOutcome::Exhausted { restart_count } => {
                tracing::error!(slot, restart_count, "slot exhausted its restart budget");
                self.bus.publish(
                    Event::new(EventKind::SlotExhausted)
                        .with_slot(slot)
                        .with_restart_count(restart_count),
                );
                self.check_fleet_health().await;
            }
        }
    }

    /// Measures running processes against the pool size.
    ///
    /// Slots in backoff have no process and do not count as live.
    async fn check_fleet_health(&mut self) {
        let live = self.slots.live_count();
        let pool = self.slots.len();
        if self.cfg.restart.is_degraded(live, pool) {
            self.emergency_restart(live, pool).await;
        } else {
            tracing::debug!(live, pool, "fleet capacity above threshold");
        }
    }

    /// Drains the whole fleet, zeroes all counters, respawns after `2 × backoff`.
    async fn emergency_restart(&mut self, live: usize, pool: usize) {
        self.epoch += 1;
        let delay = self.cfg.restart.emergency_delay();
        tracing::warn!(live, pool, delay_ms = delay.as_millis() as u64, "fleet degraded, emergency restart");
        self.bus.publish(
            Event::new(EventKind::EmergencyRestart)
                .with_delay(delay)
                .with_reason(format!("{live}/{pool} workers live")),
        );

        let stuck = self.drain_fleet(self.cfg.restart.shutdown_grace).await;
        if !stuck.is_empty() {
            tracing::warn!(?stuck, "workers force-killed during emergency restart");
        }
        self.slots.reset_all();
        self.schedule(Input::EmergencyRespawn { epoch: self.epoch }, delay);
    }

    /// Kills workers that have been silent for longer than the health timeout.
    ///
    /// The resulting exit is handled as a crash.
    fn run_health_check(&mut self) {
        let timeout = self.cfg.restart.health_timeout;
        for (slot, pid, silence) in self.slots.stale_workers(Instant::now(), timeout) {
            tracing::warn!(slot, pid, silent_ms = silence.as_millis() as u64, "worker unhealthy, terminating");
            self.bus.publish(
                Event::new(EventKind::WorkerUnhealthy)
                    .with_slot(slot)
                    .with_pid(pid)
                    .with_delay(silence),
            );
            if let Some(worker) = self.slots.worker(slot) {
                worker.kill.cancel();
            }
        }
    }

    fn on_message(&mut self, slot: SlotId, generation: u64, message: WorkerMessage) {
        if !self.slots.is_current(slot, generation) {
            tracing::debug!(slot, generation, "message from a replaced worker ignored");
            return;
        }
        match message {
            WorkerMessage::Health {
                pid,
                memory,
                uptime,
            } => {
                let first = self
                    .slots
                    .record_heartbeat(slot, Instant::now(), WorkerMetrics { memory, uptime });
                if first {
                    tracing::info!(slot, pid, "worker healthy");
                } else {
                    tracing::trace!(slot, pid, rss_bytes = memory.rss_bytes, uptime, "heartbeat");
                }
                self.bus.publish(
                    Event::new(EventKind::HeartbeatReceived)
                        .with_slot(slot)
                        .with_pid(pid),
                );
            }
            WorkerMessage::Error { error, stack, pid } => {
                tracing::error!(slot, pid, %error, stack = stack.as_deref().unwrap_or(""), "worker reported fatal error");
                self.bus.publish(
                    Event::new(EventKind::WorkerReportedError)
                        .with_slot(slot)
                        .with_pid(pid)
                        .with_reason(error),
                );
            }
            WorkerMessage::FleetEvent { event } => {
                self.relay.deliver_local(&event);
                self.forward_to_workers(Some(slot), &event);
            }
        }
    }

    /// Sends `event` to every live worker except `origin`.
    fn forward_to_workers(&self, origin: Option<SlotId>, event: &FleetEvent) {
        let mut forwarded = 0usize;
        for (slot, worker) in self.slots.live_workers() {
            if Some(slot) == origin {
                continue;
            }
            if worker
                .commands
                .send(SupervisorCommand::FleetEvent(event.clone()))
                .is_ok()
            {
                forwarded += 1;
            }
        }
        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.kind,
            origin = ?origin,
            forwarded,
            "fleet event relayed"
        );
    }

    /// Sends `"shutdown"` to every worker, waits up to `grace`, then kills the rest.
    ///
    /// Returns the slots that had to be killed.
    async fn drain_fleet(&mut self, grace: Duration) -> Vec<SlotId> {
        for (slot, worker) in self.slots.live_workers() {
            if worker.commands.send(SupervisorCommand::Shutdown).is_err() {
                tracing::debug!(slot, "command channel already closed");
            }
        }
        self.await_exits(Instant::now() + grace).await;

        let stuck = self.slots.live_slots();
        if stuck.is_empty() {
            return stuck;
        }
        for &slot in &stuck {
            if let Some(worker) = self.slots.worker(slot) {
                tracing::warn!(slot, pid = worker.pid, "worker did not exit in time, killing");
                worker.kill.cancel();
            }
        }
        self.await_exits(Instant::now() + self.cfg.kill_timeout).await;

        for slot in self.slots.live_slots() {
            tracing::error!(slot, "worker not reaped after kill, dropping record");
            self.slots.remove_worker(slot);
        }
        stuck
    }

    /// Processes inputs until no worker is live or `deadline` passes.
    ///
    /// Exits are recorded without charging the restart budget.
    async fn await_exits(&mut self, deadline: Instant) {
        while self.slots.has_live_workers() {
            let input = match tokio::time::timeout_at(deadline, self.inbox_rx.recv()).await {
                Ok(Some(input)) => input,
                Ok(None) | Err(_) => return,
            };
            match input {
                Input::Exited {
                    slot,
                    generation,
                    status,
                } => {
                    if !self.slots.is_current(slot, generation) {
                        continue;
                    }
                    if let Some((record, _)) = self.slots.remove_worker(slot) {
                        let signal = status.signal_name();
                        tracing::info!(slot, pid = record.pid, code = ?status.code, signal = ?signal, "worker stopped");
                        self.bus.publish(
                            Event::new(EventKind::WorkerExited)
                                .with_slot(slot)
                                .with_pid(record.pid)
                                .with_exit(status.code, signal.as_deref())
                                .with_reason("shutdown"),
                        );
                    }
                }
                Input::Message {
                    slot,
                    generation,
                    message,
                } => self.on_message(slot, generation, message),
                Input::Shutdown => self.shutdown_requested = true,
                Input::Snapshot(reply) => {
                    let _ = reply.send(self.slots.snapshot(Instant::now()));
                }
                Input::Respawn { .. } | Input::EmergencyRespawn { .. } => {}
            }
        }
    }

    /// Stops the fleet. Runs once; the second call returns `Ok(())` immediately.
    async fn graceful_shutdown(&mut self) -> Result<(), RuntimeError> {
        if self.shutting_down {
            return Ok(());
        }
        self.shutting_down = true;
        self.epoch += 1;

        let grace = self.cfg.restart.shutdown_grace;
        tracing::info!(grace_ms = grace.as_millis() as u64, live = self.slots.live_slots().len(), "graceful shutdown");
        self.bus.publish(Event::new(EventKind::ShutdownRequested));

        let stuck = self.drain_fleet(grace).await;
        self.slots.mark_all_stopped();

        if stuck.is_empty() {
            tracing::info!("all workers stopped within grace");
            self.bus.publish(Event::new(EventKind::AllStoppedWithin));
            Ok(())
        } else {
            let err = RuntimeError::GraceExceeded { grace, stuck };
            tracing::warn!(error = %err, "shutdown grace exceeded");
            self.bus
                .publish(Event::new(EventKind::GraceExceeded).with_reason(err.to_string()));
            Err(err)
        }
    }

    /// Delivers `input` to the loop after `delay`.
    fn schedule(&self, input: Input, delay: Duration) {
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(input);
        });
    }
}

/// Cloneable control handle of a running [`Supervisor`].
#[derive(Clone, Debug)]
pub struct SupervisorHandle {
    inbox: mpsc::UnboundedSender<Input>,
    bus: Bus,
    relay: EventRelay,
}

impl SupervisorHandle {
    /// Requests graceful shutdown. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.inbox.send(Input::Shutdown);
    }

    /// Current view of the pool; `None` once the supervisor has stopped.
    pub async fn snapshot(&self) -> Option<FleetSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.inbox.send(Input::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    /// Receives lifecycle events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// The supervisor-side event relay.
    pub fn relay(&self) -> EventRelay {
        self.relay.clone()
    }
}
