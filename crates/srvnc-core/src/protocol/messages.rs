//! Control channel message types.
//!
//! Every control message travels inside the common 24-byte header (see
//! [`crate::protocol::codec`]).  The message set is intentionally small:
//!
//! | Code | Message            | Direction        |
//! |------|--------------------|------------------|
//! | 0x01 | Register           | viewer → host    |
//! | 0x02 | RegisterAccepted   | host → viewer    |
//! | 0x03 | RegisterRejected   | host → viewer    |
//! | 0x07 | Ping               | either           |
//! | 0x08 | Pong               | either           |
//! | 0x09 | Disconnect         | either           |
//! | 0x40 | Event              | viewer → host    |
//! | 0x50 | LossReport         | viewer → host    |

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::ControlEvent;
use crate::domain::frame::FrameId;

/// Current control protocol version.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Fixed size of the control message header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Upper bound on a single control message payload.
///
/// Guards the reader against allocating whatever a corrupt length field says.
pub const MAX_CONTROL_PAYLOAD: usize = 1024 * 1024;

// ── Message type codes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Register = 0x01,
    RegisterAccepted = 0x02,
    RegisterRejected = 0x03,
    Ping = 0x07,
    Pong = 0x08,
    Disconnect = 0x09,
    Event = 0x40,
    LossReport = 0x50,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Register),
            0x02 => Ok(MessageType::RegisterAccepted),
            0x03 => Ok(MessageType::RegisterRejected),
            0x07 => Ok(MessageType::Ping),
            0x08 => Ok(MessageType::Pong),
            0x09 => Ok(MessageType::Disconnect),
            0x40 => Ok(MessageType::Event),
            0x50 => Ok(MessageType::LossReport),
            _ => Err(()),
        }
    }
}

// ── Registration ──────────────────────────────────────────────────────────────

/// REGISTER (0x01): the first message a viewer sends on a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMessage {
    /// Stable viewer identity.  Re-registering replaces the old session.
    pub client_id: Uuid,
    pub protocol_version: u8,
    /// UDP port the viewer listens on for frame chunks.
    pub datagram_port: u16,
    /// Address to stream to.  `None` means "the address this control
    /// connection came from".
    pub datagram_host: Option<IpAddr>,
}

/// REGISTER_ACCEPTED (0x02).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAcceptedMessage {
    pub session_id: Uuid,
    /// Largest chunk payload the host will send.
    pub max_payload_size: u32,
    /// Whether chunks carry checksums.
    pub checksums: bool,
}

/// Why a registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RejectReason {
    /// The host already serves its maximum number of sessions.
    Capacity = 0x01,
    /// The client id is not on the host's allow-list.
    Auth = 0x02,
    /// The viewer speaks a different protocol version.
    VersionMismatch = 0x03,
}

impl TryFrom<u8> for RejectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(RejectReason::Capacity),
            0x02 => Ok(RejectReason::Auth),
            0x03 => Ok(RejectReason::VersionMismatch),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::Capacity => "host at capacity",
            RejectReason::Auth => "client not authorised",
            RejectReason::VersionMismatch => "protocol version mismatch",
        };
        f.write_str(text)
    }
}

// ── Session control ───────────────────────────────────────────────────────────

/// Reason code carried by DISCONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DisconnectReason {
    UserInitiated = 0x00,
    ServerShutdown = 0x01,
    ProtocolError = 0x02,
    Timeout = 0x03,
    /// The same client registered again on another connection.
    Replaced = 0x04,
}

impl TryFrom<u8> for DisconnectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(DisconnectReason::UserInitiated),
            0x01 => Ok(DisconnectReason::ServerShutdown),
            0x02 => Ok(DisconnectReason::ProtocolError),
            0x03 => Ok(DisconnectReason::Timeout),
            0x04 => Ok(DisconnectReason::Replaced),
            _ => Err(()),
        }
    }
}

/// LOSS_REPORT (0x50): cumulative viewer reassembly counters.
///
/// The host's pacing policy compares successive reports to decide whether
/// to slow down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossReportMessage {
    pub last_delivered: Option<FrameId>,
    pub delivered: u64,
    /// Frames started but never delivered (superseded, timed out, evicted).
    pub abandoned: u64,
    pub stale_chunks: u64,
    pub checksum_failures: u64,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Every message that can travel on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    Register(RegisterMessage),
    RegisterAccepted(RegisterAcceptedMessage),
    RegisterRejected { reason: RejectReason },
    Event(ControlEvent),
    LossReport(LossReportMessage),
    /// Keepalive probe carrying an opaque token echoed by the peer.
    Ping(u64),
    Pong(u64),
    Disconnect { reason: DisconnectReason },
}

impl ControlMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ControlMessage::Register(_) => MessageType::Register,
            ControlMessage::RegisterAccepted(_) => MessageType::RegisterAccepted,
            ControlMessage::RegisterRejected { .. } => MessageType::RegisterRejected,
            ControlMessage::Event(_) => MessageType::Event,
            ControlMessage::LossReport(_) => MessageType::LossReport,
            ControlMessage::Ping(_) => MessageType::Ping,
            ControlMessage::Pong(_) => MessageType::Pong,
            ControlMessage::Disconnect { .. } => MessageType::Disconnect,
        }
    }
}
