//! `fleet-demo`: one executable, two roles.
//!
//! Without `FLEET_WORKER_SLOT` it runs the supervisor, which re-launches this
//! executable once per slot. With it, it runs a worker hosting a small demo
//! service that announces itself with a `worker:ready` fleet event.
//!
//! `FLEET_DEMO_FAIL_AFTER_MS` makes every worker report a fatal error after
//! the given delay, which exercises restarts and the emergency path.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetvisor::{
    FleetConfig, LogWriter, ProcessLauncher, RuntimeError, Service, ServiceContext, Subscribe,
    Supervisor, WorkerConfig, WorkerRuntime, is_worker_process,
};
use serde_json::json;
use tokio_util::task::TaskTracker;

#[tokio::main]
async fn main() -> ExitCode {
    if is_worker_process() {
        fleetvisor::init_worker_tracing();
        run_worker().await
    } else {
        fleetvisor::init_tracing();
        run_supervisor().await
    }
}

async fn run_supervisor() -> ExitCode {
    let cfg = match FleetConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(error = %err, "invalid fleet configuration");
            return ExitCode::FAILURE;
        }
    };
    let launcher = match ProcessLauncher::current_exe() {
        Ok(launcher) => launcher,
        Err(err) => {
            tracing::error!(error = %err, "cannot locate own executable");
            return ExitCode::FAILURE;
        }
    };

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let supervisor = match Supervisor::builder(cfg, Arc::new(launcher))
        .with_subscribers(subs)
        .build()
    {
        Ok(supervisor) => supervisor,
        Err(err) => {
            tracing::error!(error = %err, "cannot build supervisor");
            return ExitCode::FAILURE;
        }
    };

    supervisor.relay().on("worker:ready", |ev| {
        tracing::info!(origin = %ev.origin_id, payload = %ev.payload, "worker announced itself");
        Ok(())
    });

    match supervisor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ RuntimeError::GraceExceeded { .. }) => {
            tracing::warn!(error = %err, "fleet stopped after forced kills");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, label = err.as_label(), "supervisor failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_worker() -> ExitCode {
    let cfg = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(error = %err, "invalid worker configuration");
            return ExitCode::FAILURE;
        }
    };
    let fail_after = std::env::var("FLEET_DEMO_FAIL_AFTER_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis);

    let service = DemoService {
        jobs: TaskTracker::new(),
        fail_after,
    };
    let exit = WorkerRuntime::stdio(cfg).run(service).await;
    if let Some(err) = &exit.error {
        tracing::error!(error = %err, label = err.as_label(), "worker stopped with error");
    }
    ExitCode::from(u8::try_from(exit.code).unwrap_or(1))
}

/// Accepts a simulated job every second until shutdown.
struct DemoService {
    jobs: TaskTracker,
    fail_after: Option<Duration>,
}

#[async_trait]
impl Service for DemoService {
    fn name(&self) -> &str {
        "demo"
    }

    async fn start(&self, ctx: ServiceContext) -> anyhow::Result<()> {
        let me = ctx.relay.origin_id().to_string();
        ctx.relay.on("worker:ready", move |ev| {
            tracing::info!(worker = %me, peer = %ev.origin_id, "peer is ready");
            Ok(())
        });

        let jobs = self.jobs.clone();
        let shutdown = ctx.shutdown.clone();
        self.jobs.spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            let mut n = 0u64;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        n += 1;
                        jobs.spawn(async move {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            tracing::debug!(job = n, "job done");
                        });
                    }
                }
            }
        });

        if let Some(after) = self.fail_after {
            let fatal = ctx.fatal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                fatal.report("simulated failure", None);
            });
        }

        ctx.relay.emit(
            "worker:ready",
            json!({ "slot": ctx.slot, "pid": std::process::id() }),
        );
        Ok(())
    }

    async fn drained(&self) {
        self.jobs.close();
        self.jobs.wait().await;
    }
}
