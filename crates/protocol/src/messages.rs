//! Terminal control messages.
//!
//! Inbound packets are validated into statically typed requests, one struct
//! per action. Outbound notifications are built from the correlation context
//! of the session they belong to.

use serde_json::{Map, Value};

use crate::codec::{decode_payload, encode_payload};
use crate::error::{ProtocolError, Result};
use crate::packet::{CorrelationContext, Packet};

/// Action names understood by the terminal engine.
pub mod act {
    /// Create a new terminal session.
    pub const INIT: &str = "initTerminal";
    /// Write keystrokes into a session.
    pub const INPUT: &str = "inputTerminal";
    /// Change the terminal dimensions.
    pub const RESIZE: &str = "resizeTerminal";
    /// Terminate a session.
    pub const KILL: &str = "killTerminal";
    /// Keep an idle session alive.
    pub const PING: &str = "pingTerminal";
    /// Outbound: a chunk of shell output.
    pub const OUTPUT: &str = "outputTerminal";
    /// Outbound: the session is gone.
    pub const QUIT: &str = "quitTerminal";
}

/// Message attached to `quitTerminal` notifications sent in reply to a
/// request against a session that no longer exists.
pub const SESSION_CLOSED_MSG: &str = "terminal session closed";

// ============================================================================
// Requests
// ============================================================================

/// Request to spawn a shell bound to the given terminal identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTerminal {
    /// Caller-chosen session identifier.
    pub terminal: String,
}

/// Request to deliver keystrokes to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTerminal {
    /// Target session identifier.
    pub terminal: String,
    /// Decoded bytes to write to the PTY.
    pub input: Vec<u8>,
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    /// Columns.
    pub width: u16,
    /// Rows.
    pub height: u16,
}

/// Request to resize a session's terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeTerminal {
    /// Target session identifier.
    pub terminal: String,
    /// New dimensions.
    pub size: TerminalSize,
}

/// Request to terminate a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillTerminal {
    /// Target session identifier.
    pub terminal: String,
}

/// Keepalive for an idle session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingTerminal {
    /// Target session identifier.
    pub terminal: String,
}

/// A validated inbound terminal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalRequest {
    /// `initTerminal`
    Create(CreateTerminal),
    /// `inputTerminal`
    Input(InputTerminal),
    /// `resizeTerminal`
    Resize(ResizeTerminal),
    /// `killTerminal`
    Kill(KillTerminal),
    /// `pingTerminal`
    Ping(PingTerminal),
}

impl TerminalRequest {
    /// Validates a packet into a typed request.
    ///
    /// Returns `Ok(None)` when the action is not a terminal action.
    pub fn from_packet(packet: &Packet) -> Result<Option<Self>> {
        let request = match packet.act.as_str() {
            act::INIT => Self::Create(CreateTerminal::from_packet(packet)?),
            act::INPUT => Self::Input(InputTerminal::from_packet(packet)?),
            act::RESIZE => Self::Resize(ResizeTerminal::from_packet(packet)?),
            act::KILL => Self::Kill(KillTerminal::from_packet(packet)?),
            act::PING => Self::Ping(PingTerminal::from_packet(packet)?),
            _ => return Ok(None),
        };
        Ok(Some(request))
    }

    /// Returns the identifier of the targeted session.
    pub fn terminal(&self) -> &str {
        match self {
            Self::Create(req) => &req.terminal,
            Self::Input(req) => &req.terminal,
            Self::Resize(req) => &req.terminal,
            Self::Kill(req) => &req.terminal,
            Self::Ping(req) => &req.terminal,
        }
    }
}

impl CreateTerminal {
    /// Validates an `initTerminal` packet. The identifier must be non-empty.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        let data = packet.data.as_ref().ok_or(ProtocolError::TerminalIdMissing)?;
        let terminal = terminal_field(data)?;
        if terminal.is_empty() {
            return Err(ProtocolError::TerminalIdMissing);
        }
        Ok(Self { terminal })
    }
}

impl InputTerminal {
    /// Validates an `inputTerminal` packet.
    ///
    /// The payload is checked and decoded before the identifier, so a
    /// malformed payload is rejected regardless of the target.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        let data = packet
            .data
            .as_ref()
            .ok_or(ProtocolError::DataNotFound("data"))?;
        let encoded = data
            .get("input")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::DataNotFound("input"))?;
        let input = decode_payload(encoded)?;
        let terminal = terminal_field(data)?;
        Ok(Self { terminal, input })
    }
}

impl ResizeTerminal {
    /// Validates a `resizeTerminal` packet.
    ///
    /// Dimensions must be JSON numbers; they are narrowed to `u16` with
    /// saturation and are otherwise not range checked.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        let data = packet
            .data
            .as_ref()
            .ok_or(ProtocolError::DataNotFound("data"))?;
        let width = dimension_field(data, "width")?;
        let height = dimension_field(data, "height")?;
        let terminal = terminal_field(data)?;
        Ok(Self {
            terminal,
            size: TerminalSize { width, height },
        })
    }
}

impl KillTerminal {
    /// Validates a `killTerminal` packet.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        let data = packet.data.as_ref().ok_or(ProtocolError::TerminalIdMissing)?;
        Ok(Self {
            terminal: terminal_field(data)?,
        })
    }
}

impl PingTerminal {
    /// Validates a `pingTerminal` packet.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        let data = packet.data.as_ref().ok_or(ProtocolError::TerminalIdMissing)?;
        Ok(Self {
            terminal: terminal_field(data)?,
        })
    }
}

fn terminal_field(data: &Map<String, Value>) -> Result<String> {
    data.get("terminal")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(ProtocolError::TerminalIdMissing)
}

fn dimension_field(data: &Map<String, Value>, key: &str) -> Result<u16> {
    let value = data
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| ProtocolError::DataInvalid(format!("{} must be a number", key)))?;
    // `as` saturates out-of-range floats and maps NaN to zero.
    Ok(value as u16)
}

// ============================================================================
// Notifications
// ============================================================================

/// Builds an `outputTerminal` frame carrying one chunk of shell output.
pub fn output_frame(context: &CorrelationContext, chunk: &[u8]) -> Packet {
    context.address(Packet::new(act::OUTPUT).with_field("output", encode_payload(chunk)))
}

/// Builds a `quitTerminal` notification.
pub fn quit_notice(context: &CorrelationContext, msg: Option<&str>) -> Packet {
    let packet = Packet::new(act::QUIT);
    let packet = match msg {
        Some(msg) => packet.with_msg(msg),
        None => packet,
    };
    context.address(packet)
}
