mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleetvisor::{
    EventKind, FleetEvent, Service, ServiceContext, ServiceFn, ShutdownCause, SupervisorCommand,
    WorkerConfig, WorkerMessage, WorkerRuntime, decode_worker_message, encode_command,
};
use serde_json::json;
use support::{FakeLauncher, eventually, fleet, start};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

const LIMIT: Duration = Duration::from_secs(5);

fn record(relay: &fleetvisor::EventRelay, kind: &str) -> Arc<Mutex<Vec<FleetEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    relay.on(kind, move |ev| {
        sink.lock().unwrap().push(ev.clone());
        Ok(())
    });
    seen
}

#[tokio::test]
async fn worker_event_reaches_supervisor_and_other_workers() {
    let launcher = FakeLauncher::new();
    let mut sup = start(fleet(3), &launcher);
    let on_supervisor = record(&sup.handle.relay(), "job:done");
    for _ in 0..3 {
        sup.events.wait_kind(EventKind::WorkerSpawned).await;
    }

    let sent = launcher.emit_from(0, "job:done", json!({ "job": 42 }));

    eventually(LIMIT, || {
        launcher.received(1).len() == 1 && launcher.received(2).len() == 1
    })
    .await;
    assert!(launcher.received(0).is_empty());
    assert_eq!(launcher.received(1)[0], sent);
    assert_eq!(launcher.received(2)[0].origin_id, "worker-0");

    let seen = on_supervisor.lock().unwrap().clone();
    assert_eq!(seen, vec![sent]);

    let (result, _) = sup.stop().await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn supervisor_emit_reaches_every_worker() {
    let launcher = FakeLauncher::new();
    let mut sup = start(fleet(2), &launcher);
    let relay = sup.handle.relay();
    let local = record(&relay, "config:reload");
    for _ in 0..2 {
        sup.events.wait_kind(EventKind::WorkerSpawned).await;
    }

    let sent = relay.emit("config:reload", json!({ "version": 7 }));
    assert_eq!(local.lock().unwrap().len(), 1);
    assert_eq!(sent.origin_id, "supervisor");

    eventually(LIMIT, || {
        launcher.received(0).len() == 1 && launcher.received(1).len() == 1
    })
    .await;
    assert_eq!(launcher.received(0)[0].event_id, sent.event_id);

    let (result, _) = sup.stop().await;
    assert!(result.is_ok());
}

/// The supervisor end of an in-memory control channel.
struct Channel {
    frames: Lines<BufReader<ReadHalf<DuplexStream>>>,
    commands: WriteHalf<DuplexStream>,
}

impl Channel {
    async fn next(&mut self) -> Option<WorkerMessage> {
        let line = tokio::time::timeout(LIMIT, self.frames.next_line())
            .await
            .expect("worker frame in time")
            .expect("readable channel")?;
        Some(decode_worker_message(&line).expect("well-formed frame"))
    }

    async fn send(&mut self, cmd: &SupervisorCommand) {
        let mut line = encode_command(cmd).unwrap();
        line.push('\n');
        self.commands.write_all(line.as_bytes()).await.unwrap();
    }

    /// Reads until the worker closes its side.
    async fn rest(&mut self) -> Vec<WorkerMessage> {
        let mut out = Vec::new();
        while let Some(msg) = self.next().await {
            out.push(msg);
        }
        out
    }
}

type DuplexRuntime = WorkerRuntime<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

fn worker(slot: usize) -> (DuplexRuntime, Channel) {
    worker_draining_for(slot, Duration::from_secs(1))
}

fn worker_draining_for(slot: usize, drain_timeout: Duration) -> (DuplexRuntime, Channel) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let (their_read, their_write) = tokio::io::split(theirs);
    let (our_read, our_write) = tokio::io::split(ours);
    let cfg = WorkerConfig {
        slot: Some(slot),
        heartbeat_interval: Duration::from_secs(3600),
        drain_timeout,
        trap_panics: false,
    };
    let runtime = WorkerRuntime::new(cfg, their_read, their_write);
    let channel = Channel {
        frames: BufReader::new(our_read).lines(),
        commands: our_write,
    };
    (runtime, channel)
}

fn is_error(msg: &WorkerMessage) -> bool {
    matches!(msg, WorkerMessage::Error { .. })
}

#[tokio::test]
async fn shutdown_command_drains_and_exits_zero() {
    let (runtime, mut channel) = worker(0);
    let task = tokio::spawn(runtime.run(ServiceFn::new("idle", |ctx: ServiceContext| async move {
        assert!(!ctx.shutdown.is_cancelled());
        Ok(())
    })));

    match channel.next().await {
        Some(WorkerMessage::Health { pid, .. }) => assert_eq!(pid, std::process::id()),
        other => panic!("expected a heartbeat first, got {other:?}"),
    }

    channel.send(&SupervisorCommand::Shutdown).await;
    let exit = task.await.unwrap();
    assert_eq!(exit.cause, ShutdownCause::Command);
    assert_eq!(exit.code, 0);
    assert!(exit.error.is_none());
    assert!(!channel.rest().await.iter().any(is_error));
}

/// Never finishes its in-flight work.
struct Stuck;

#[async_trait]
impl Service for Stuck {
    async fn start(&self, _ctx: ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn drained(&self) {
        std::future::pending::<()>().await
    }
}

#[tokio::test]
async fn drain_that_never_finishes_times_out_and_exits_one() {
    let drain_timeout = Duration::from_millis(200);
    let (runtime, mut channel) = worker_draining_for(4, drain_timeout);
    let task = tokio::spawn(runtime.run(Stuck));

    assert!(matches!(channel.next().await, Some(WorkerMessage::Health { .. })));
    let asked_at = std::time::Instant::now();
    channel.send(&SupervisorCommand::Shutdown).await;

    let exit = tokio::time::timeout(LIMIT, task)
        .await
        .expect("worker gave up on the drain")
        .unwrap();
    let took = asked_at.elapsed();
    assert!(took >= drain_timeout, "{took:?}");
    assert!(took < drain_timeout + Duration::from_millis(800), "{took:?}");

    assert_eq!(exit.cause, ShutdownCause::Command);
    assert_eq!(exit.code, 1);
    assert_eq!(exit.error.as_ref().map(|e| e.as_label()), Some("worker_drain_timeout"));
    assert!(!channel.rest().await.iter().any(is_error));
}

#[tokio::test]
async fn closed_channel_is_a_clean_shutdown() {
    let (runtime, channel) = worker(0);
    let task = tokio::spawn(runtime.run(ServiceFn::new("idle", |_ctx: ServiceContext| async { Ok(()) })));

    drop(channel);
    let exit = task.await.unwrap();
    assert_eq!(exit.cause, ShutdownCause::ChannelClosed);
    assert_eq!(exit.code, 0);
}

#[tokio::test]
async fn failing_service_reports_once_and_exits_one() {
    let (runtime, mut channel) = worker(1);
    let task = tokio::spawn(runtime.run(ServiceFn::new("broken", |_ctx: ServiceContext| async {
        anyhow::bail!("database unreachable")
    })));

    let exit = task.await.unwrap();
    assert_eq!(exit.cause, ShutdownCause::Fatal);
    assert_eq!(exit.code, 1);
    assert_eq!(exit.error.as_ref().map(|e| e.as_label()), Some("worker_service_failed"));

    let errors: Vec<_> = channel.rest().await.into_iter().filter(is_error).collect();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        WorkerMessage::Error { error, pid, .. } => {
            assert!(error.contains("database unreachable"), "{error}");
            assert_eq!(*pid, std::process::id());
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn second_fatal_report_is_ignored() {
    let (runtime, mut channel) = worker(2);
    let fatal = runtime.fatal_handle();
    let task = tokio::spawn(runtime.run(ServiceFn::new("flaky", |ctx: ServiceContext| async move {
        assert!(ctx.fatal.report("first failure", Some("at step 1".into())));
        assert!(!ctx.fatal.report("second failure", None));
        Ok(())
    })));

    let exit = task.await.unwrap();
    assert_eq!(exit.code, 1);
    assert!(fatal.is_tripped());

    let errors: Vec<_> = channel.rest().await.into_iter().filter(is_error).collect();
    assert_eq!(
        errors,
        vec![WorkerMessage::Error {
            error: "first failure".into(),
            stack: Some("at step 1".into()),
            pid: std::process::id(),
        }]
    );
}

#[tokio::test]
async fn local_emit_runs_listeners_and_goes_upstream() {
    let (runtime, mut channel) = worker(3);
    let seen = record(&runtime.relay(), "cache:flushed");
    let relay = runtime.relay();
    let task = tokio::spawn(runtime.run(ServiceFn::new("emitter", |ctx: ServiceContext| async move {
        let before = ctx.relay.listener_count("cache:flushed");
        ctx.relay.emit("cache:flushed", json!({ "keys": 12 }));
        assert_eq!(before, 1);
        Ok(())
    })));

    let event = loop {
        match channel.next().await {
            Some(WorkerMessage::FleetEvent { event }) => break event,
            Some(_) => continue,
            None => panic!("channel closed before the event arrived"),
        }
    };
    assert_eq!(event.kind, "cache:flushed");
    assert_eq!(event.origin_id, "worker-3");
    assert_eq!(event.payload["keys"], 12);

    let local = seen.lock().unwrap().clone();
    assert_eq!(local, vec![event]);

    // Inbound relay traffic reaches the same listeners.
    let inbound = FleetEvent::new("cache:flushed", json!({ "keys": 3 }), "worker-0");
    channel
        .send(&SupervisorCommand::FleetEvent(inbound.clone()))
        .await;
    eventually(LIMIT, || seen.lock().unwrap().len() == 2).await;
    assert_eq!(seen.lock().unwrap()[1], inbound);
    assert_eq!(relay.origin_id(), "worker-3");

    channel.send(&SupervisorCommand::Shutdown).await;
    assert_eq!(task.await.unwrap().code, 0);
}
