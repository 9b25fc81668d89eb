//! # Backoff curve for respawning crashed slots.
//!
//! [`BackoffPolicy`] maps a slot's restart number to a delay:
//! `first × factor^n`, clamped to `max`, then jittered.
//!
//! The default is a **constant** 5s delay (`factor = 1.0`, no jitter), which is
//! the classic fleet behaviour. A growing curve is opt-in:
//!
//! ```rust
//! use std::time::Duration;
//! use fleetvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(8),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(2), Duration::from_secs(4));
//! assert_eq!(backoff.next(9), Duration::from_secs(8));
//! ```

use std::time::Duration;

use crate::error::ConfigError;
use crate::policies::jitter::JitterPolicy;

/// Respawn delay curve.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first respawn of a slot.
    pub first: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Multiplicative growth per restart (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied after clamping.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Constant 5s, capped at 60s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(5),
            max: Duration::from_secs(60),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// A constant delay with no jitter.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay for the given 0-indexed restart number.
    ///
    /// Overflowing or non-finite intermediate values clamp to `max`.
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !self.factor.is_finite() || self.factor <= 0.0 {
            return Err(ConfigError::invalid(
                "backoff.factor",
                format!("{} must be a positive number", self.factor),
            ));
        }
        if self.max < self.first {
            return Err(ConfigError::invalid(
                "backoff.max",
                format!("{:?} is below backoff.first {:?}", self.max, self.first),
            ));
        }
        Ok(())
    }
}
