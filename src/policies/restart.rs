//! # Restart policy for worker slots.
//!
//! [`RestartPolicy`] is the immutable rulebook the supervisor applies whenever a
//! worker leaves the fleet:
//!
//! ```text
//! crash / unhealthy
//!   ├─ restart_count < max_attempts ─► restart_count += 1, respawn after backoff
//!   └─ restart_count == max_attempts ─► slot Exhausted
//!                                        └─► is_degraded(live, pool)?
//!                                              └─ yes ─► emergency restart
//!                                                        (drain, reset counters,
//!                                                         respawn after 2 × backoff)
//! ```
//!
//! ## Defaults
//! - `max_attempts = 5`
//! - `backoff = 5s constant` (see [`BackoffPolicy`])
//! - `health_timeout = 60s`
//! - `shutdown_grace = 10s`
//! - `emergency_threshold = 0.5`, inclusive boundary

use std::time::Duration;

use crate::error::ConfigError;
use crate::policies::backoff::BackoffPolicy;

/// How the live fraction is compared against [`RestartPolicy::emergency_threshold`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThresholdBoundary {
    /// Degraded when `live / pool <= threshold` (default).
    #[default]
    Inclusive,
    /// Degraded when `live / pool < threshold`.
    Exclusive,
}

/// Bounded-retry policy shared by every slot of the pool.
#[derive(Clone, Copy, Debug)]
pub struct RestartPolicy {
    /// Crash-triggered respawns allowed per slot before it is exhausted.
    pub max_attempts: u32,
    /// Delay before a crashed slot is respawned.
    pub backoff: BackoffPolicy,
    /// Maximum silence between heartbeats before a worker is terminated.
    pub health_timeout: Duration,
    /// How long workers get to exit on their own after a shutdown command.
    pub shutdown_grace: Duration,
    /// Live fraction at which the fleet is considered degraded.
    pub emergency_threshold: f64,
    /// Comparison used against `emergency_threshold`.
    pub threshold_boundary: ThresholdBoundary,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
            health_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
            emergency_threshold: 0.5,
            threshold_boundary: ThresholdBoundary::Inclusive,
        }
    }
}

impl RestartPolicy {
    /// Base delay between a crash and the replacement spawn.
    #[inline]
    pub fn backoff_delay(&self) -> Duration {
        self.backoff.first
    }

    /// Delay for the restart that brings the slot's counter to `restart_count`.
    ///
    /// The first restart (`restart_count == 1`) waits `backoff.first`; later ones
    /// follow the backoff curve.
    #[inline]
    pub fn restart_delay(&self, restart_count: u32) -> Duration {
        self.backoff.next(restart_count.saturating_sub(1))
    }

    /// Delay between an emergency drain and the full-pool respawn.
    #[inline]
    pub fn emergency_delay(&self) -> Duration {
        self.backoff_delay().saturating_mul(2)
    }

    /// Returns `true` while the slot still has restart budget.
    #[inline]
    pub fn allows_restart(&self, restart_count: u32) -> bool {
        restart_count < self.max_attempts
    }

    /// Returns `true` when `live` workers out of `pool` slots cross the emergency threshold.
    pub fn is_degraded(&self, live: usize, pool: usize) -> bool {
        if pool == 0 {
            return false;
        }
        let fraction = live as f64 / pool as f64;
        match self.threshold_boundary {
            ThresholdBoundary::Inclusive => fraction <= self.emergency_threshold,
            ThresholdBoundary::Exclusive => fraction < self.emergency_threshold,
        }
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.emergency_threshold) {
            return Err(ConfigError::invalid(
                "emergency_threshold",
                format!("{} is outside [0, 1]", self.emergency_threshold),
            ));
        }
        if self.health_timeout.is_zero() {
            return Err(ConfigError::invalid("health_timeout", "must be greater than 0"));
        }
        if self.shutdown_grace.is_zero() {
            return Err(ConfigError::invalid("shutdown_grace", "must be greater than 0"));
        }
        self.backoff.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_exhausted_at_max_attempts() {
        let policy = RestartPolicy::default();
        assert!(policy.allows_restart(0));
        assert!(policy.allows_restart(4));
        assert!(!policy.allows_restart(5));
        assert!(!policy.allows_restart(6));
    }

    #[test]
    fn half_of_pool_is_degraded_with_inclusive_boundary() {
        let policy = RestartPolicy::default();
        assert!(!policy.is_degraded(3, 4));
        assert!(policy.is_degraded(2, 4));
        assert!(policy.is_degraded(0, 4));
    }

    #[test]
    fn exclusive_boundary_tolerates_exactly_half() {
        let policy = RestartPolicy {
            threshold_boundary: ThresholdBoundary::Exclusive,
            ..RestartPolicy::default()
        };
        assert!(!policy.is_degraded(2, 4));
        assert!(policy.is_degraded(1, 4));
    }

    #[test]
    fn empty_pool_is_never_degraded() {
        assert!(!RestartPolicy::default().is_degraded(0, 0));
    }

    #[test]
    fn emergency_waits_twice_the_backoff() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff_delay(), Duration::from_secs(5));
        assert_eq!(policy.restart_delay(1), Duration::from_secs(5));
        assert_eq!(policy.restart_delay(5), Duration::from_secs(5));
        assert_eq!(policy.emergency_delay(), Duration::from_secs(10));
    }

    #[test]
    fn threshold_outside_unit_range_is_rejected() {
        let policy = RestartPolicy {
            emergency_threshold: 1.5,
            ..RestartPolicy::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::Invalid {
                field: "emergency_threshold",
                ..
            })
        ));
    }
}
