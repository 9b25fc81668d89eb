//! NDJSON framing for the control channel.
//!
//! One JSON value per line, at most [`MAX_FRAME_BYTES`] per line. Readers are
//! built with [`framed_lines`], writers go through [`write_frame`].

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::error::ProtocolError;
use crate::protocol::message::{SupervisorCommand, WorkerMessage};

/// Longest accepted line, newline excluded.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

const SHUTDOWN_LITERAL: &str = "shutdown";
const FLEET_EVENT_TYPE: &str = "FLEET_EVENT";

/// Wraps a reader into a stream of size-bounded lines.
pub fn framed_lines<R: AsyncRead>(reader: R) -> FramedRead<R, LinesCodec> {
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_BYTES))
}

/// Writes one line and flushes.
pub async fn write_frame<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

pub fn encode_worker_message(msg: &WorkerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

pub fn decode_worker_message(line: &str) -> Result<WorkerMessage, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}

pub fn encode_command(cmd: &SupervisorCommand) -> Result<String, ProtocolError> {
    match cmd {
        SupervisorCommand::Shutdown => Ok(serde_json::to_string(SHUTDOWN_LITERAL)?),
        SupervisorCommand::FleetEvent(event) => encode_worker_message(&WorkerMessage::FleetEvent {
            event: event.clone(),
        }),
    }
}

/// Decodes a supervisor frame: either the `"shutdown"` string literal or a
/// `FLEET_EVENT` object. A bare `shutdown` without quotes is accepted too.
pub fn decode_command(line: &str) -> Result<SupervisorCommand, ProtocolError> {
    let line = line.trim();
    if line == SHUTDOWN_LITERAL {
        return Ok(SupervisorCommand::Shutdown);
    }
    match serde_json::from_str::<serde_json::Value>(line)? {
        serde_json::Value::String(s) if s == SHUTDOWN_LITERAL => Ok(SupervisorCommand::Shutdown),
        serde_json::Value::String(s) => Err(ProtocolError::UnknownCommand(s)),
        value => {
            let kind = value
                .get("type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            if kind != FLEET_EVENT_TYPE {
                return Err(ProtocolError::UnexpectedType(kind));
            }
            match serde_json::from_value::<WorkerMessage>(value)? {
                WorkerMessage::FleetEvent { event } => Ok(SupervisorCommand::FleetEvent(event)),
                _ => Err(ProtocolError::UnexpectedType(kind)),
            }
        }
    }
}
