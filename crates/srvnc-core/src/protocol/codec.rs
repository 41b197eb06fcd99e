//! Binary codec for control channel messages.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][seq:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 24 bytes. All multi-byte integers are big-endian.
//!
//! The header carries its own payload length, so the same bytes can be sent
//! over a raw TCP stream (the reader uses [`decode_header`] to learn how much
//! more to read) or as one WebSocket binary message.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use uuid::Uuid;

use crate::domain::event::{ControlEvent, EventKind, ModifierFlags, MouseButton};
use crate::domain::frame::current_timestamp_us;
use crate::protocol::messages::{
    ControlMessage, DisconnectReason, LossReportMessage, MessageType, RegisterAcceptedMessage,
    RegisterMessage, RejectReason, HEADER_SIZE, MAX_CONTROL_PAYLOAD, PROTOCOL_VERSION,
};

/// Errors that can occur while encoding or decoding wire data.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The version byte is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed (field value out of range, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// A payload exceeds [`MAX_CONTROL_PAYLOAD`].
    #[error("payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// A chunk header describes an index outside its frame.
    #[error("invalid chunk metadata: index {index} of {count}")]
    InvalidChunkMetadata { index: u32, count: u32 },
}

/// Decoded fixed header of a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub payload_len: usize,
    pub sequence: u64,
    pub timestamp_us: u64,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`ControlMessage`] into a byte vector including the 24-byte header.
///
/// The sequence number is **not** set by this function – pass a value from a
/// [`crate::protocol::SequenceCounter`].
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the payload exceeds
/// [`MAX_CONTROL_PAYLOAD`].
///
/// # Examples
///
/// ```rust
/// use srvnc_core::protocol::{decode_message, encode_message, ControlMessage};
///
/// let msg = ControlMessage::Ping(42);
/// let bytes = encode_message(&msg, 0, 0).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(
    msg: &ControlMessage,
    sequence_number: u64,
    timestamp_us: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg);
    if payload.len() > MAX_CONTROL_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_CONTROL_PAYLOAD,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&timestamp_us.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encodes a [`ControlMessage`] using the current system time as the timestamp.
///
/// # Errors
///
/// See [`encode_message`].
pub fn encode_message_now(
    msg: &ControlMessage,
    sequence_number: u64,
) -> Result<Vec<u8>, ProtocolError> {
    encode_message(msg, sequence_number, current_timestamp_us())
}

/// Parses and validates the 24-byte header at the start of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError`] for a short buffer, an unknown version or
/// message type, or a payload length above [`MAX_CONTROL_PAYLOAD`].
pub fn decode_header(bytes: &[u8]) -> Result<MessageHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let msg_type_byte = bytes[1];
    let message_type = MessageType::try_from(msg_type_byte)
        .map_err(|_| ProtocolError::UnknownMessageType(msg_type_byte))?;

    // bytes[2..4] are reserved – ignored on decode

    let payload_len = read_u32(bytes, 4)? as usize;
    if payload_len > MAX_CONTROL_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload_len,
            max: MAX_CONTROL_PAYLOAD,
        });
    }

    Ok(MessageHeader {
        message_type,
        payload_len,
        sequence: read_u64(bytes, 8)?,
        timestamp_us: read_u64(bytes, 16)?,
    })
}

/// Decodes one [`ControlMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (header + payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(ControlMessage, usize), ProtocolError> {
    let header = decode_header(bytes)?;

    let total_needed = HEADER_SIZE + header.payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: header.payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let msg = decode_payload(header.message_type, payload)?;
    Ok((msg, total_needed))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &ControlMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        ControlMessage::Register(m) => encode_register(&mut buf, m),
        ControlMessage::RegisterAccepted(m) => encode_register_accepted(&mut buf, m),
        ControlMessage::RegisterRejected { reason } => buf.push(*reason as u8),
        ControlMessage::Event(e) => encode_event(&mut buf, e),
        ControlMessage::LossReport(m) => encode_loss_report(&mut buf, m),
        ControlMessage::Ping(token) | ControlMessage::Pong(token) => {
            buf.extend_from_slice(&token.to_be_bytes())
        }
        ControlMessage::Disconnect { reason } => buf.push(*reason as u8),
    }
    buf
}

fn encode_register(buf: &mut Vec<u8>, m: &RegisterMessage) {
    buf.extend_from_slice(m.client_id.as_bytes());
    buf.push(m.protocol_version);
    buf.extend_from_slice(&m.datagram_port.to_be_bytes());
    match m.datagram_host {
        None => buf.push(0),
        Some(IpAddr::V4(v4)) => {
            buf.push(4);
            buf.extend_from_slice(&v4.octets());
        }
        Some(IpAddr::V6(v6)) => {
            buf.push(6);
            buf.extend_from_slice(&v6.octets());
        }
    }
}

fn encode_register_accepted(buf: &mut Vec<u8>, m: &RegisterAcceptedMessage) {
    buf.extend_from_slice(m.session_id.as_bytes());
    buf.extend_from_slice(&m.max_payload_size.to_be_bytes());
    buf.push(u8::from(m.checksums));
}

fn encode_event(buf: &mut Vec<u8>, e: &ControlEvent) {
    buf.extend_from_slice(&e.event_id.to_be_bytes());
    buf.extend_from_slice(&e.timestamp_us.to_be_bytes());
    buf.push(e.kind.tag());
    match &e.kind {
        EventKind::KeyDown { key_code, modifiers } | EventKind::KeyUp { key_code, modifiers } => {
            buf.extend_from_slice(&key_code.to_be_bytes());
            buf.push(modifiers.0);
        }
        EventKind::MouseMove { x, y } => {
            buf.extend_from_slice(&x.to_be_bytes());
            buf.extend_from_slice(&y.to_be_bytes());
        }
        EventKind::MouseButton { button, pressed } => {
            buf.push(*button as u8);
            buf.push(u8::from(*pressed));
        }
        EventKind::Scroll { delta_x, delta_y } => {
            buf.extend_from_slice(&delta_x.to_be_bytes());
            buf.extend_from_slice(&delta_y.to_be_bytes());
        }
        EventKind::Custom(bytes) => {
            buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
    }
}

fn encode_loss_report(buf: &mut Vec<u8>, m: &LossReportMessage) {
    buf.push(u8::from(m.last_delivered.is_some()));
    buf.extend_from_slice(&m.last_delivered.unwrap_or(0).to_be_bytes());
    buf.extend_from_slice(&m.delivered.to_be_bytes());
    buf.extend_from_slice(&m.abandoned.to_be_bytes());
    buf.extend_from_slice(&m.stale_chunks.to_be_bytes());
    buf.extend_from_slice(&m.checksum_failures.to_be_bytes());
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MessageType, p: &[u8]) -> Result<ControlMessage, ProtocolError> {
    match msg_type {
        MessageType::Register => decode_register(p).map(ControlMessage::Register),
        MessageType::RegisterAccepted => {
            decode_register_accepted(p).map(ControlMessage::RegisterAccepted)
        }
        MessageType::RegisterRejected => {
            require_len(p, 1, "RegisterRejected")?;
            let reason = RejectReason::try_from(p[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown reject reason: {}", p[0]))
            })?;
            Ok(ControlMessage::RegisterRejected { reason })
        }
        MessageType::Event => decode_event(p).map(ControlMessage::Event),
        MessageType::LossReport => decode_loss_report(p).map(ControlMessage::LossReport),
        MessageType::Ping => Ok(ControlMessage::Ping(read_u64(p, 0)?)),
        MessageType::Pong => Ok(ControlMessage::Pong(read_u64(p, 0)?)),
        MessageType::Disconnect => {
            require_len(p, 1, "Disconnect")?;
            let reason = DisconnectReason::try_from(p[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown disconnect reason: {}", p[0]))
            })?;
            Ok(ControlMessage::Disconnect { reason })
        }
    }
}

fn decode_register(p: &[u8]) -> Result<RegisterMessage, ProtocolError> {
    // 16 (uuid) + 1 (version) + 2 (port) + 1 (host tag)
    require_len(p, 20, "Register")?;
    let client_id = read_uuid(p, 0)?;
    let protocol_version = p[16];
    let datagram_port = u16::from_be_bytes([p[17], p[18]]);
    let datagram_host = match p[19] {
        0 => None,
        4 => {
            require_len(p, 24, "Register.ipv4")?;
            Some(IpAddr::V4(Ipv4Addr::new(p[20], p[21], p[22], p[23])))
        }
        6 => {
            require_len(p, 36, "Register.ipv6")?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&p[20..36]);
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        other => {
            return Err(ProtocolError::MalformedPayload(format!(
                "unknown address family tag: {other}"
            )))
        }
    };
    Ok(RegisterMessage {
        client_id,
        protocol_version,
        datagram_port,
        datagram_host,
    })
}

fn decode_register_accepted(p: &[u8]) -> Result<RegisterAcceptedMessage, ProtocolError> {
    require_len(p, 21, "RegisterAccepted")?;
    Ok(RegisterAcceptedMessage {
        session_id: read_uuid(p, 0)?,
        max_payload_size: read_u32(p, 16)?,
        checksums: read_bool(p[20], "RegisterAccepted.checksums")?,
    })
}

fn decode_event(p: &[u8]) -> Result<ControlEvent, ProtocolError> {
    // 8 (event_id) + 8 (timestamp) + 1 (kind)
    require_len(p, 17, "Event")?;
    let event_id = read_u64(p, 0)?;
    let timestamp_us = read_u64(p, 8)?;
    let f = &p[17..];
    let kind = match p[16] {
        tag @ (0x01 | 0x02) => {
            require_len(f, 3, "Event.key")?;
            let key_code = u16::from_be_bytes([f[0], f[1]]);
            let modifiers = ModifierFlags(f[2]);
            if tag == 0x01 {
                EventKind::KeyDown { key_code, modifiers }
            } else {
                EventKind::KeyUp { key_code, modifiers }
            }
        }
        0x03 => {
            require_len(f, 8, "Event.mouse_move")?;
            EventKind::MouseMove {
                x: read_u32(f, 0)? as i32,
                y: read_u32(f, 4)? as i32,
            }
        }
        0x04 => {
            require_len(f, 2, "Event.mouse_button")?;
            let button = MouseButton::try_from(f[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown mouse button: {}", f[0]))
            })?;
            EventKind::MouseButton {
                button,
                pressed: read_bool(f[1], "Event.mouse_button.pressed")?,
            }
        }
        0x05 => {
            require_len(f, 4, "Event.scroll")?;
            EventKind::Scroll {
                delta_x: i16::from_be_bytes([f[0], f[1]]),
                delta_y: i16::from_be_bytes([f[2], f[3]]),
            }
        }
        0x06 => {
            let len = read_u32(f, 0)? as usize;
            require_len(f, 4 + len, "Event.custom")?;
            EventKind::Custom(f[4..4 + len].to_vec())
        }
        other => {
            return Err(ProtocolError::MalformedPayload(format!(
                "unknown event kind: 0x{other:02X}"
            )))
        }
    };
    Ok(ControlEvent {
        event_id,
        timestamp_us,
        kind,
    })
}

fn decode_loss_report(p: &[u8]) -> Result<LossReportMessage, ProtocolError> {
    require_len(p, 41, "LossReport")?;
    let has_last = read_bool(p[0], "LossReport.has_last")?;
    let last = read_u64(p, 1)?;
    Ok(LossReportMessage {
        last_delivered: has_last.then_some(last),
        delivered: read_u64(p, 9)?,
        abandoned: read_u64(p, 17)?,
        stale_chunks: read_u64(p, 25)?,
        checksum_failures: read_u64(p, 33)?,
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_bool(byte: u8, context: &str) -> Result<bool, ProtocolError> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtocolError::MalformedPayload(format!(
            "{context}: expected 0 or 1, got {other}"
        ))),
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    match buf.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(ProtocolError::InsufficientData {
            needed: offset + 4,
            available: buf.len(),
        }),
    }
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    match buf.get(offset..offset + 8) {
        Some(b) => Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])),
        None => Err(ProtocolError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        }),
    }
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    match buf.get(offset..offset + 16) {
        Some(b) => Uuid::from_slice(b)
            .map_err(|e| ProtocolError::MalformedPayload(format!("invalid uuid: {e}"))),
        None => Err(ProtocolError::InsufficientData {
            needed: offset + 16,
            available: buf.len(),
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: ControlMessage) -> ControlMessage {
        let bytes = encode_message(&msg, 7, 1_000).expect("encode");
        let (decoded, consumed) = decode_message(&bytes).expect("decode");
        assert_eq!(consumed, bytes.len());
        decoded
    }

    #[test]
    fn test_header_fields_are_written_big_endian() {
        // Arrange
        let msg = ControlMessage::Ping(1);

        // Act
        let bytes = encode_message(&msg, 0x0102, 0x0304).expect("encode");
        let header = decode_header(&bytes).expect("header");

        // Assert
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], MessageType::Ping as u8);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 8]);
        assert_eq!(header.sequence, 0x0102);
        assert_eq!(header.timestamp_us, 0x0304);
        assert_eq!(header.payload_len, 8);
    }

    #[test]
    fn test_register_without_host_roundtrips() {
        let msg = ControlMessage::Register(RegisterMessage {
            client_id: Uuid::new_v4(),
            protocol_version: PROTOCOL_VERSION,
            datagram_port: 10_000,
            datagram_host: None,
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_register_with_ipv6_host_roundtrips() {
        let msg = ControlMessage::Register(RegisterMessage {
            client_id: Uuid::new_v4(),
            protocol_version: PROTOCOL_VERSION,
            datagram_port: 4000,
            datagram_host: Some("fe80::1".parse().expect("ip")),
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_every_event_kind_survives_encoding() {
        let kinds = vec![
            EventKind::KeyDown { key_code: 0x04, modifiers: ModifierFlags(ModifierFlags::SHIFT) },
            EventKind::KeyUp { key_code: 0x04, modifiers: ModifierFlags::default() },
            EventKind::MouseMove { x: -20, y: 1080 },
            EventKind::MouseButton { button: MouseButton::Right, pressed: false },
            EventKind::Scroll { delta_x: 0, delta_y: -3 },
            EventKind::Custom(b"reload".to_vec()),
        ];
        for (i, kind) in kinds.into_iter().enumerate() {
            let msg = ControlMessage::Event(ControlEvent {
                event_id: i as u64,
                timestamp_us: 55,
                kind,
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }
    }

    #[test]
    fn test_loss_report_preserves_missing_watermark() {
        let msg = ControlMessage::LossReport(LossReportMessage {
            last_delivered: None,
            delivered: 0,
            abandoned: 3,
            stale_chunks: 9,
            checksum_failures: 1,
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_decode_rejects_unknown_message_type() {
        let mut bytes = encode_message(&ControlMessage::Ping(0), 0, 0).expect("encode");
        bytes[1] = 0xEE;

        assert_eq!(
            decode_message(&bytes).unwrap_err(),
            ProtocolError::UnknownMessageType(0xEE)
        );
    }

    #[test]
    fn test_decode_rejects_oversized_length_field() {
        let mut bytes = encode_message(&ControlMessage::Ping(0), 0, 0).expect("encode");
        bytes[4..8].copy_from_slice(&u32::MAX.to_be_bytes());

        assert!(matches!(
            decode_header(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_reports_truncated_payload() {
        let bytes = encode_message(&ControlMessage::Pong(5), 0, 0).expect("encode");

        let err = decode_message(&bytes[..HEADER_SIZE + 3]).unwrap_err();

        assert_eq!(
            err,
            ProtocolError::PayloadLengthMismatch { declared: 8, available: 3 }
        );
    }

    #[test]
    fn test_custom_event_length_beyond_payload_is_malformed() {
        let msg = ControlMessage::Event(ControlEvent {
            event_id: 1,
            timestamp_us: 0,
            kind: EventKind::Custom(vec![1, 2, 3]),
        });
        let mut bytes = encode_message(&msg, 0, 0).expect("encode");
        // Inflate the custom length prefix past the end of the payload.
        let len_offset = HEADER_SIZE + 17;
        bytes[len_offset..len_offset + 4].copy_from_slice(&100u32.to_be_bytes());

        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_oversized_custom_event_is_refused_at_encode() {
        let msg = ControlMessage::Event(ControlEvent {
            event_id: 1,
            timestamp_us: 0,
            kind: EventKind::Custom(vec![0; MAX_CONTROL_PAYLOAD + 1]),
        });

        assert!(matches!(
            encode_message(&msg, 0, 0),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}
