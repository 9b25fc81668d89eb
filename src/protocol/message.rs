//! Control-channel message shapes.

use serde::{Deserialize, Serialize};

use crate::relay::FleetEvent;

/// Frames a worker writes to its stdout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    /// Fatal error report, sent once before the worker exits.
    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
        pid: u32,
    },

    /// Periodic heartbeat.
    #[serde(rename = "health")]
    Health {
        pid: u32,
        #[serde(default)]
        memory: MemoryUsage,
        /// Seconds since the worker runtime started.
        uptime: f64,
    },

    /// Relay traffic, in either direction.
    #[serde(rename = "FLEET_EVENT")]
    FleetEvent { event: FleetEvent },
}

/// Memory figures carried by heartbeats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Resident set size in bytes.
    #[serde(default)]
    pub rss_bytes: u64,
    /// Virtual memory size in bytes.
    #[serde(default)]
    pub virtual_bytes: u64,
}

/// Frames the supervisor writes to a worker's stdin.
#[derive(Clone, Debug, PartialEq)]
pub enum SupervisorCommand {
    /// Begin graceful shutdown and exit 0.
    Shutdown,
    /// An event relayed from a sibling or from the supervisor itself.
    FleetEvent(FleetEvent),
}
