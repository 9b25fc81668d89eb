//! Error types used by the supervisor, the worker runtime and the control channel.
//!
//! This module defines the error enums of the crate:
//!
//! - [`RuntimeError`]: errors raised by the supervisor itself.
//! - [`WorkerError`]: errors raised inside a worker process.
//! - [`ProtocolError`]: malformed or unknown control-channel frames.
//! - [`ConfigError`]: invalid configuration values.
//!
//! Each type provides `as_label` for logs/metrics.

use std::time::Duration;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::core::SlotId;

/// # Errors produced by the supervisor.
///
/// These represent failures of the orchestration itself, such as a shutdown
/// that had to force-kill stragglers.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; the listed slots had to be force-killed.
    #[error("shutdown timeout {grace:?} exceeded; stuck slots: {stuck:?}; forced termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Slots whose worker did not exit in time.
        stuck: Vec<SlotId>,
    },

    /// A worker process could not be started.
    #[error("failed to spawn worker for slot {slot}: {source}")]
    Spawn {
        /// Slot that was being filled.
        slot: SlotId,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Termination signal listeners could not be installed.
    #[error("failed to install termination signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    /// Configuration rejected at build time.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use fleetvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(10), stuck: vec![2] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Spawn { .. } => "runtime_spawn_failed",
            RuntimeError::Signal(_) => "runtime_signal_install_failed",
            RuntimeError::Config(_) => "runtime_invalid_config",
        }
    }
}

/// # Errors produced inside a worker process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A panic or a failed service task was trapped.
    #[error("fatal error: {error}")]
    Fatal {
        /// Rendered error message.
        error: String,
        /// Captured backtrace, if the platform provided one.
        stack: Option<String>,
    },

    /// The service failed to start.
    #[error("service failed: {error}")]
    Service {
        /// Rendered error chain.
        error: String,
    },

    /// In-flight work did not finish within the drain window.
    #[error("drain did not finish within {timeout:?}")]
    DrainTimeout {
        /// The configured drain window.
        timeout: Duration,
    },

    /// Reading or writing the control channel failed.
    #[error("control channel failure: {0}")]
    Channel(#[from] std::io::Error),
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Fatal { .. } => "worker_fatal",
            WorkerError::Service { .. } => "worker_service_failed",
            WorkerError::DrainTimeout { .. } => "worker_drain_timeout",
            WorkerError::Channel(_) => "worker_channel_failed",
        }
    }

    /// Wraps a service failure, keeping the whole `anyhow` context chain.
    pub fn service(err: &anyhow::Error) -> Self {
        WorkerError::Service {
            error: format!("{err:#}"),
        }
    }
}

/// # Control-channel decoding errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame is not valid JSON or does not match any message shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// A string command other than `"shutdown"` was received.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// An object frame carried an unexpected `type`.
    #[error("unexpected frame type {0:?}")]
    UnexpectedType(String),

    /// The line framing failed (I/O error or frame over the size limit).
    #[error("framing error: {0}")]
    Frame(#[from] LinesCodecError),
}

impl ProtocolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProtocolError::Json(_) => "protocol_malformed",
            ProtocolError::UnknownCommand(_) => "protocol_unknown_command",
            ProtocolError::UnexpectedType(_) => "protocol_unexpected_type",
            ProtocolError::Frame(_) => "protocol_framing",
        }
    }
}

/// # Configuration errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is outside its allowed range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// An environment variable could not be parsed.
    #[error("cannot parse ${var}: {reason}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// Parser message.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        let err = RuntimeError::Spawn {
            slot: 3,
            source: std::io::Error::other("no such file"),
        };
        assert_eq!(err.as_label(), "runtime_spawn_failed");
        assert!(err.to_string().contains("slot 3"));

        let err = WorkerError::DrainTimeout {
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.as_label(), "worker_drain_timeout");

        assert_eq!(
            ProtocolError::UnknownCommand("reload".into()).as_label(),
            "protocol_unknown_command"
        );
    }

    #[test]
    fn service_error_keeps_context_chain() {
        let err = anyhow::anyhow!("port in use").context("binding listener");
        let wrapped = WorkerError::service(&err);
        assert_eq!(
            wrapped.to_string(),
            "service failed: binding listener: port in use"
        );
    }
}
