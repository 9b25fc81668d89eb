#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleetvisor::{
    Event, EventKind, FleetConfig, FleetEvent, Inbox, Launcher, MemoryUsage, RuntimeError, SlotId,
    Supervisor, SupervisorCommand, SupervisorHandle, WorkerExitStatus, WorkerMessage,
    WorkerProcess,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One call to [`FakeLauncher::launch`].
#[derive(Clone, Debug)]
pub struct Launch {
    pub slot: SlotId,
    pub generation: u64,
    pub pid: u32,
    pub at: Instant,
}

struct FakeWorker {
    generation: u64,
    pid: u32,
    inbox: Inbox,
    crash: mpsc::UnboundedSender<i32>,
}

#[derive(Default)]
struct State {
    next_pid: u32,
    launches: Vec<Launch>,
    workers: HashMap<SlotId, FakeWorker>,
    stubborn: HashSet<SlotId>,
    fail_next: HashSet<SlotId>,
    received: HashMap<SlotId, Vec<FleetEvent>>,
}

/// In-memory launcher: each "process" is a task that exits on command.
///
/// - `"shutdown"` exits with code 0, unless the slot is stubborn.
/// - The kill token ends it as if by `SIGKILL`.
/// - Relayed fleet events are recorded per slot.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<State>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        let launcher = Self::default();
        launcher.state.lock().unwrap().next_pid = 1000;
        launcher
    }

    /// Workers of `slot` will ignore `"shutdown"`.
    pub fn set_stubborn(&self, slot: SlotId) {
        self.state.lock().unwrap().stubborn.insert(slot);
    }

    /// The next launch of `slot` fails.
    pub fn fail_next_launch(&self, slot: SlotId) {
        self.state.lock().unwrap().fail_next.insert(slot);
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn launches_of(&self, slot: SlotId) -> Vec<Launch> {
        self.launches().into_iter().filter(|l| l.slot == slot).collect()
    }

    /// Fleet events relayed to the workers of `slot`, across generations.
    pub fn received(&self, slot: SlotId) -> Vec<FleetEvent> {
        self.state
            .lock()
            .unwrap()
            .received
            .get(&slot)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes the current worker of `slot` exit with `code`.
    pub fn crash(&self, slot: SlotId, code: i32) {
        let state = self.state.lock().unwrap();
        let worker = state.workers.get(&slot).expect("slot has no running worker");
        worker.crash.send(code).expect("worker task is gone");
    }

    /// Delivers a heartbeat from the current worker of `slot`.
    pub fn heartbeat(&self, slot: SlotId) {
        let state = self.state.lock().unwrap();
        if let Some(w) = state.workers.get(&slot) {
            w.inbox.message(
                slot,
                w.generation,
                WorkerMessage::Health {
                    pid: w.pid,
                    memory: MemoryUsage {
                        rss_bytes: 4096,
                        virtual_bytes: 8192,
                    },
                    uptime: 1.0,
                },
            );
        }
    }

    /// Delivers a `FLEET_EVENT` frame as if the worker of `slot` emitted it.
    pub fn emit_from(&self, slot: SlotId, kind: &str, payload: serde_json::Value) -> FleetEvent {
        let event = FleetEvent::new(kind, payload, format!("worker-{slot}"));
        let state = self.state.lock().unwrap();
        let w = state.workers.get(&slot).expect("slot has no running worker");
        w.inbox.message(
            slot,
            w.generation,
            WorkerMessage::FleetEvent {
                event: event.clone(),
            },
        );
        event
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(
        &self,
        slot: SlotId,
        generation: u64,
        inbox: Inbox,
    ) -> Result<WorkerProcess, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next.remove(&slot) {
            return Err(RuntimeError::Spawn {
                slot,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
            });
        }

        state.next_pid += 1;
        let pid = state.next_pid;
        state.launches.push(Launch {
            slot,
            generation,
            pid,
            at: Instant::now(),
        });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (crash_tx, crash_rx) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();
        state.workers.insert(
            slot,
            FakeWorker {
                generation,
                pid,
                inbox: inbox.clone(),
                crash: crash_tx,
            },
        );

        tokio::spawn(fake_worker(
            Arc::clone(&self.state),
            slot,
            generation,
            state.stubborn.contains(&slot),
            inbox,
            cmd_rx,
            crash_rx,
            kill.clone(),
        ));

        Ok(WorkerProcess {
            pid,
            commands: cmd_tx,
            kill,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn fake_worker(
    state: Arc<Mutex<State>>,
    slot: SlotId,
    generation: u64,
    stubborn: bool,
    inbox: Inbox,
    mut commands: mpsc::UnboundedReceiver<SupervisorCommand>,
    mut crash: mpsc::UnboundedReceiver<i32>,
    kill: CancellationToken,
) {
    let status = loop {
        tokio::select! {
            _ = kill.cancelled() => break WorkerExitStatus::signaled(9),
            Some(code) = crash.recv() => break WorkerExitStatus::code(code),
            cmd = commands.recv() => match cmd {
                Some(SupervisorCommand::Shutdown) if !stubborn => break WorkerExitStatus::code(0),
                Some(SupervisorCommand::Shutdown) => {}
                Some(SupervisorCommand::FleetEvent(event)) => {
                    state.lock().unwrap().received.entry(slot).or_default().push(event);
                }
                None => break WorkerExitStatus::code(0),
            },
        }
    };

    {
        let mut state = state.lock().unwrap();
        if state.workers.get(&slot).is_some_and(|w| w.generation == generation) {
            state.workers.remove(&slot);
        }
    }
    inbox.exited(slot, generation, status);
}

/// Every lifecycle event seen so far, plus a way to wait for more.
pub struct Events {
    rx: broadcast::Receiver<Event>,
    pub seen: Vec<Event>,
}

impl Events {
    pub fn new(rx: broadcast::Receiver<Event>) -> Self {
        Self {
            rx,
            seen: Vec::new(),
        }
    }

    /// Waits for the next event matching `pred`.
    pub async fn wait_for(&mut self, what: &str, pred: impl Fn(&Event) -> bool) -> Event {
        loop {
            let ev = match tokio::time::timeout(Duration::from_secs(600), self.rx.recv()).await {
                Ok(Ok(ev)) => ev,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => panic!("bus closed waiting for {what}"),
                Err(_) => panic!("timed out waiting for {what}"),
            };
            self.seen.push(ev.clone());
            if pred(&ev) {
                return ev;
            }
        }
    }

    pub async fn wait_kind(&mut self, kind: EventKind) -> Event {
        self.wait_for(kind.as_label(), |ev| ev.kind == kind).await
    }

    pub async fn wait_slot(&mut self, kind: EventKind, slot: SlotId) -> Event {
        self.wait_for(kind.as_label(), |ev| ev.kind == kind && ev.slot == Some(slot))
            .await
    }

    /// Collects events that are already queued.
    pub fn drain(&mut self) {
        while let Ok(ev) = self.rx.try_recv() {
            self.seen.push(ev);
        }
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.seen.iter().filter(|ev| ev.kind == kind).count()
    }
}

/// A supervisor over `launcher`, running in the background.
pub struct Running {
    pub handle: SupervisorHandle,
    pub events: Events,
    pub task: JoinHandle<Result<(), RuntimeError>>,
}

impl Running {
    pub async fn stop(self) -> (Result<(), RuntimeError>, Events) {
        self.handle.shutdown();
        let result = self.task.await.expect("supervisor task panicked");
        let mut events = self.events;
        events.drain();
        (result, events)
    }
}

pub fn start(cfg: FleetConfig, launcher: &FakeLauncher) -> Running {
    let supervisor = Supervisor::builder(cfg, Arc::new(launcher.clone()))
        .listen_os_signals(false)
        .build()
        .expect("valid config");
    let handle = supervisor.handle();
    let events = Events::new(handle.subscribe());
    let task = tokio::spawn(supervisor.run());
    Running {
        handle,
        events,
        task,
    }
}

/// Default fleet config for scenarios, with a quiet health checker.
pub fn fleet(pool_size: usize) -> FleetConfig {
    let mut cfg = FleetConfig {
        pool_size,
        ..FleetConfig::default()
    };
    cfg.restart.health_timeout = Duration::from_secs(3600);
    cfg
}

/// Polls `cond` until it holds, panicking after `limit`.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in {limit:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
