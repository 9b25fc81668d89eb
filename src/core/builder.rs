use std::sync::Arc;

use crate::config::FleetConfig;
use crate::core::launcher::Launcher;
use crate::core::supervisor::Supervisor;
use crate::error::RuntimeError;
use crate::events::Bus;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for constructing a [`Supervisor`].
pub struct SupervisorBuilder {
    cfg: FleetConfig,
    launcher: Arc<dyn Launcher>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    listen_os_signals: bool,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration and launcher.
    pub fn new(cfg: FleetConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            cfg,
            launcher,
            subscribers: Vec::new(),
            listen_os_signals: true,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive lifecycle events (spawns, exits, restarts, shutdown)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Whether SIGINT/SIGTERM/SIGQUIT trigger graceful shutdown (default: `true`).
    pub fn listen_os_signals(mut self, on: bool) -> Self {
        self.listen_os_signals = on;
        self
    }

    /// Validates the configuration and builds the supervisor.
    ///
    /// Must be called inside a Tokio runtime: subscriber workers start here.
    pub fn build(self) -> Result<Supervisor, RuntimeError> {
        self.cfg.validate()?;
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        Ok(Supervisor::new_internal(
            self.cfg,
            self.launcher,
            bus,
            subs,
            self.listen_os_signals,
        ))
    }
}
