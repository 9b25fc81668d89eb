//! # Application-level fleet events.
//!
//! A [`FleetEvent`] is what [`EventRelay::emit`](crate::EventRelay::emit)
//! produces and what travels inside `FLEET_EVENT` frames. It is ephemeral:
//! nothing stores it, and the relay does not de-duplicate by `event_id`.
//!
//! On the wire the fields are camelCase:
//! ```text
//! {"eventId":"cache:flush-1700000000000-a1B2c3D4","type":"cache:flush",
//!  "payload":{"key":"users"},"timestamp":1700000000000,"originId":"worker-2"}
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

/// Event type reserved for listener failures.
pub const ERROR_EVENT: &str = "error";

const ID_SUFFIX_LEN: usize = 8;

/// One application event emitted somewhere in the fleet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetEvent {
    /// `"{type}-{timestamp}-{suffix}"`.
    pub event_id: String,
    /// Event name listeners register for.
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Milliseconds since the Unix epoch at emission.
    pub timestamp: u64,
    /// Process that emitted the event (`"supervisor"`, `"worker-3"`, ...).
    pub origin_id: String,
}

impl FleetEvent {
    /// Creates an event stamped with the current time and a fresh id.
    pub fn new(
        kind: impl Into<String>,
        payload: serde_json::Value,
        origin_id: impl Into<String>,
    ) -> Self {
        let kind = kind.into();
        let timestamp = now_millis();
        Self {
            event_id: event_id(&kind, timestamp),
            kind,
            payload,
            timestamp,
            origin_id: origin_id.into(),
        }
    }

    /// Returns `true` for the reserved listener-failure event.
    #[inline]
    pub fn is_error_event(&self) -> bool {
        self.kind == ERROR_EVENT
    }
}

fn event_id(kind: &str, timestamp: u64) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{kind}-{timestamp}-{suffix}")
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}
