//! # Control channel between the supervisor and its workers.
//!
//! Each worker is connected to the supervisor by its standard streams:
//!
//! ```text
//! Supervisor ── stdin  ──► Worker     "shutdown" | {"type":"FLEET_EVENT",...}
//! Supervisor ◄── stdout ── Worker     {"type":"health"|"error"|"FLEET_EVENT",...}
//!                 stderr ── inherited, carries the worker's logs
//! ```
//!
//! Messages are newline-delimited JSON. A line that fails to decode is logged
//! by the receiving side and skipped.

mod codec;
mod message;

pub use codec::{
    MAX_FRAME_BYTES, decode_command, decode_worker_message, encode_command,
    encode_worker_message, framed_lines, write_frame,
};
pub use message::{MemoryUsage, SupervisorCommand, WorkerMessage};
