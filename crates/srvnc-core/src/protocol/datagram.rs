//! Wire format for frame chunks sent as UDP datagrams.
//!
//! ```text
//! [version:1][flags:1][frame_id:8][chunk_index:4][chunk_count:4][payload_len:4][payload:N][checksum:4]?
//! ```
//! Header size: 22 bytes.  All multi-byte integers are big-endian.  The
//! trailing checksum is present only when [`flags::HAS_CHECKSUM`] is set.
//!
//! One chunk maps to exactly one datagram, so the decoder insists that the
//! declared lengths account for every byte it is given.

use bytes::{BufMut, Bytes, BytesMut};

use crate::domain::frame::Chunk;
use crate::protocol::codec::ProtocolError;

/// Chunk wire format version.
pub const CHUNK_WIRE_VERSION: u8 = 0x01;

/// Fixed size of the chunk header.
pub const CHUNK_HEADER_SIZE: usize = 22;

/// Size of the optional checksum trailer.
pub const CHECKSUM_SIZE: usize = 4;

/// Largest UDP payload over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Bits of the header `flags` byte.
pub mod flags {
    /// A 4-byte checksum follows the payload.
    pub const HAS_CHECKSUM: u8 = 1 << 0;
}

/// Number of bytes [`encode_chunk`] produces for `chunk`.
pub fn encoded_len(chunk: &Chunk) -> usize {
    CHUNK_HEADER_SIZE
        + chunk.payload.len()
        + if chunk.checksum.is_some() { CHECKSUM_SIZE } else { 0 }
}

/// Serialises a chunk into one datagram.
///
/// # Examples
///
/// ```rust
/// use bytes::Bytes;
/// use srvnc_core::protocol::datagram::{decode_chunk, encode_chunk};
/// use srvnc_core::Chunk;
///
/// let chunk = Chunk {
///     frame_id: 9,
///     chunk_index: 1,
///     chunk_count: 2,
///     payload: Bytes::from_static(b"tail"),
///     checksum: None,
/// };
/// let wire = encode_chunk(&chunk);
/// assert_eq!(decode_chunk(wire).unwrap(), chunk);
/// ```
pub fn encode_chunk(chunk: &Chunk) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(chunk));
    let flag_bits = if chunk.checksum.is_some() {
        flags::HAS_CHECKSUM
    } else {
        0
    };

    buf.put_u8(CHUNK_WIRE_VERSION);
    buf.put_u8(flag_bits);
    buf.put_u64(chunk.frame_id);
    buf.put_u32(chunk.chunk_index);
    buf.put_u32(chunk.chunk_count);
    // The chunker caps payloads well below u32::MAX.
    buf.put_u32(chunk.payload.len() as u32);
    buf.put_slice(&chunk.payload);
    if let Some(sum) = chunk.checksum {
        buf.put_u32(sum);
    }
    buf.freeze()
}

/// Parses one datagram into a [`Chunk`].
///
/// The returned payload shares memory with `datagram`.
///
/// # Errors
///
/// Returns [`ProtocolError`] for short or oversized datagrams, an unknown
/// version, or chunk metadata that cannot describe a real frame.
pub fn decode_chunk(datagram: Bytes) -> Result<Chunk, ProtocolError> {
    if datagram.len() < CHUNK_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: CHUNK_HEADER_SIZE,
            available: datagram.len(),
        });
    }

    let h = &datagram[..CHUNK_HEADER_SIZE];
    if h[0] != CHUNK_WIRE_VERSION {
        return Err(ProtocolError::UnsupportedVersion(h[0]));
    }
    let flag_bits = h[1];
    let frame_id = u64::from_be_bytes([h[2], h[3], h[4], h[5], h[6], h[7], h[8], h[9]]);
    let chunk_index = u32::from_be_bytes([h[10], h[11], h[12], h[13]]);
    let chunk_count = u32::from_be_bytes([h[14], h[15], h[16], h[17]]);
    let payload_len = u32::from_be_bytes([h[18], h[19], h[20], h[21]]) as usize;

    if chunk_count == 0 || chunk_index >= chunk_count {
        return Err(ProtocolError::InvalidChunkMetadata {
            index: chunk_index,
            count: chunk_count,
        });
    }

    let has_checksum = flag_bits & flags::HAS_CHECKSUM != 0;
    let trailer = if has_checksum { CHECKSUM_SIZE } else { 0 };
    let expected_len = CHUNK_HEADER_SIZE + payload_len + trailer;
    if datagram.len() < expected_len {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available: datagram.len() - CHUNK_HEADER_SIZE,
        });
    }
    if datagram.len() > expected_len {
        return Err(ProtocolError::MalformedPayload(format!(
            "{} trailing bytes after chunk",
            datagram.len() - expected_len
        )));
    }

    let payload_end = CHUNK_HEADER_SIZE + payload_len;
    let checksum = has_checksum.then(|| {
        let t = &datagram[payload_end..];
        u32::from_be_bytes([t[0], t[1], t[2], t[3]])
    });
    let payload = datagram.slice(CHUNK_HEADER_SIZE..payload_end);

    Ok(Chunk {
        frame_id,
        chunk_index,
        chunk_count,
        payload,
        checksum,
    })
}
