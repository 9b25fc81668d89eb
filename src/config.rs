//! # Fleet and worker configuration.
//!
//! [`FleetConfig`] drives the supervisor, [`WorkerConfig`] drives the runtime
//! inside each worker process. Both can be built in code (all fields are public)
//! or loaded from `FLEET_*` environment variables with `from_env()`.
//!
//! ## Environment
//! | Variable                         | Field                              | Unit    |
//! |----------------------------------|------------------------------------|---------|
//! | `FLEET_POOL_SIZE`                | `FleetConfig::pool_size`           | count   |
//! | `FLEET_MAX_ATTEMPTS`             | `RestartPolicy::max_attempts`      | count   |
//! | `FLEET_BACKOFF_MS`               | `RestartPolicy::backoff.first`     | ms      |
//! | `FLEET_HEALTH_TIMEOUT_MS`        | `RestartPolicy::health_timeout`    | ms      |
//! | `FLEET_SHUTDOWN_GRACE_MS`        | `RestartPolicy::shutdown_grace`    | ms      |
//! | `FLEET_EMERGENCY_THRESHOLD`      | `RestartPolicy::emergency_threshold` | fraction |
//! | `FLEET_HEALTH_CHECK_INTERVAL_MS` | `FleetConfig::health_check_interval` | ms    |
//! | `FLEET_WORKER_SLOT`              | `WorkerConfig::slot`               | index   |
//! | `FLEET_HEARTBEAT_MS`             | `WorkerConfig::heartbeat_interval` | ms      |
//! | `FLEET_DRAIN_TIMEOUT_MS`         | `WorkerConfig::drain_timeout`      | ms      |

use std::str::FromStr;
use std::time::Duration;

use crate::core::SlotId;
use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, RestartPolicy};

/// Environment variable that marks a process as a worker and carries its slot.
pub const WORKER_SLOT_ENV: &str = "FLEET_WORKER_SLOT";

/// Supervisor-side configuration.
///
/// ## Field semantics
/// - `pool_size`: number of worker slots (default: available parallelism)
/// - `restart`: bounded-retry rules shared by all slots
/// - `health_check_interval`: how often heartbeat ages are evaluated
/// - `bus_capacity`: lifecycle event ring buffer (min 1)
/// - `kill_timeout`: how long to wait for a force-killed worker to be reaped
#[derive(Clone, Debug)]
pub struct FleetConfig {
    /// Number of worker slots.
    pub pool_size: usize,
    /// Restart/backoff/health/shutdown rules.
    pub restart: RestartPolicy,
    /// Period of the health-check loop.
    pub health_check_interval: Duration,
    /// Capacity of the lifecycle event bus.
    pub bus_capacity: usize,
    /// Upper bound on waiting for exit notifications after a forced kill.
    pub kill_timeout: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            restart: RestartPolicy::default(),
            health_check_interval: Duration::from_secs(15),
            bus_capacity: 1024,
            kill_timeout: Duration::from_secs(2),
        }
    }
}

impl FleetConfig {
    /// Loads overrides from the process environment on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads overrides through `lookup` on top of the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(n) = parse_var::<usize, _>(&lookup, "FLEET_POOL_SIZE")? {
            cfg.pool_size = n;
        }
        if let Some(n) = parse_var::<u32, _>(&lookup, "FLEET_MAX_ATTEMPTS")? {
            cfg.restart.max_attempts = n;
        }
        if let Some(d) = parse_millis(&lookup, "FLEET_BACKOFF_MS")? {
            cfg.restart.backoff = BackoffPolicy {
                first: d,
                max: cfg.restart.backoff.max.max(d),
                ..cfg.restart.backoff
            };
        }
        if let Some(d) = parse_millis(&lookup, "FLEET_HEALTH_TIMEOUT_MS")? {
            cfg.restart.health_timeout = d;
        }
        if let Some(d) = parse_millis(&lookup, "FLEET_SHUTDOWN_GRACE_MS")? {
            cfg.restart.shutdown_grace = d;
        }
        if let Some(f) = parse_var::<f64, _>(&lookup, "FLEET_EMERGENCY_THRESHOLD")? {
            cfg.restart.emergency_threshold = f;
        }
        if let Some(d) = parse_millis(&lookup, "FLEET_HEALTH_CHECK_INTERVAL_MS")? {
            cfg.health_check_interval = d;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::invalid("pool_size", "must be greater than 0"));
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::invalid(
                "health_check_interval",
                "must be greater than 0",
            ));
        }
        self.restart.validate()
    }
}

/// Worker-side configuration.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Slot this worker fills (`None` when run outside a fleet).
    pub slot: Option<SlotId>,
    /// Period between heartbeats sent to the supervisor.
    pub heartbeat_interval: Duration,
    /// Bound on waiting for in-flight work during shutdown.
    pub drain_timeout: Duration,
    /// Install a process-wide panic hook that routes panics to the fatal path.
    pub trap_panics: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            slot: None,
            heartbeat_interval: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
            trap_panics: true,
        }
    }
}

impl WorkerConfig {
    /// Loads overrides from the process environment on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads overrides through `lookup` on top of the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self {
            slot: parse_var::<SlotId, _>(&lookup, WORKER_SLOT_ENV)?,
            ..Self::default()
        };
        if let Some(d) = parse_millis(&lookup, "FLEET_HEARTBEAT_MS")? {
            cfg.heartbeat_interval = d;
        }
        if let Some(d) = parse_millis(&lookup, "FLEET_DRAIN_TIMEOUT_MS")? {
            cfg.drain_timeout = d;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Identifier used as `originId` for events emitted by this process.
    pub fn origin_id(&self) -> String {
        match self.slot {
            Some(slot) => format!("worker-{slot}"),
            None => format!("pid-{}", std::process::id()),
        }
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::invalid(
                "heartbeat_interval",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Returns `true` when the current process was launched as a fleet worker.
pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_SLOT_ENV).is_some()
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Env {
                var,
                reason: e.to_string(),
            }),
    }
}

fn parse_millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<u64, _>(lookup, var)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_fleet_conventions() {
        let cfg = FleetConfig::from_lookup(lookup(&[])).unwrap();
        assert!(cfg.pool_size >= 1);
        assert_eq!(cfg.restart.max_attempts, 5);
        assert_eq!(cfg.restart.backoff_delay(), Duration::from_millis(5000));
        assert_eq!(cfg.restart.health_timeout, Duration::from_millis(60_000));
        assert_eq!(cfg.restart.shutdown_grace, Duration::from_millis(10_000));
        assert_eq!(cfg.restart.emergency_threshold, 0.5);

        let worker = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(worker.slot, None);
        assert_eq!(worker.drain_timeout, Duration::from_secs(5));
        assert_eq!(worker.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_are_applied() {
        let cfg = FleetConfig::from_lookup(lookup(&[
            ("FLEET_POOL_SIZE", "4"),
            ("FLEET_MAX_ATTEMPTS", "2"),
            ("FLEET_BACKOFF_MS", "250"),
            ("FLEET_EMERGENCY_THRESHOLD", "0.25"),
        ]))
        .unwrap();
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.restart.max_attempts, 2);
        assert_eq!(cfg.restart.backoff_delay(), Duration::from_millis(250));
        assert_eq!(cfg.restart.emergency_threshold, 0.25);

        let worker =
            WorkerConfig::from_lookup(lookup(&[(WORKER_SLOT_ENV, "3"), ("FLEET_HEARTBEAT_MS", "100")]))
                .unwrap();
        assert_eq!(worker.slot, Some(3));
        assert_eq!(worker.origin_id(), "worker-3");
        assert_eq!(worker.heartbeat_interval, Duration::from_millis(100));
    }

    #[test]
    fn garbage_values_name_the_variable() {
        let err = FleetConfig::from_lookup(lookup(&[("FLEET_POOL_SIZE", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "FLEET_POOL_SIZE", .. }));
    }

    #[test]
    fn zero_pool_is_rejected() {
        let err = FleetConfig::from_lookup(lookup(&[("FLEET_POOL_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "pool_size", .. }));
    }
}
