//! Frames and the chunks they are split into for datagram transport.
//!
//! # Vocabulary (for beginners)
//!
//! A **frame** is one encoded screen image.  SR-VNC never looks inside the
//! payload: the capture/encode collaborator hands us opaque bytes and the
//! display collaborator on the viewer receives the same bytes back.
//!
//! A frame is usually far larger than a single UDP datagram, so the host splits
//! it into **chunks**.  Every chunk carries enough metadata (`frame_id`,
//! `chunk_index`, `chunk_count`) for the viewer to put the frame back together
//! even when the chunks arrive out of order.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Identifier of a frame within one streaming session.
///
/// Frame ids increase monotonically per session.  A larger id always means a
/// newer image, which is what lets the viewer discard stale data.
pub type FrameId = u64;

/// One encoded screen image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Monotonically increasing id within the session.
    pub frame_id: FrameId,
    /// Microseconds since the Unix epoch.
    ///
    /// On the host this is the capture time.  On the viewer it is the time the
    /// last missing chunk arrived, because the chunk header does not carry the
    /// capture timestamp.
    pub timestamp_us: u64,
    /// Opaque encoded image bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame from any byte container convertible into [`Bytes`].
    pub fn new(frame_id: FrameId, timestamp_us: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_id,
            timestamp_us,
            payload: payload.into(),
        }
    }

    /// Creates a frame stamped with the current wall-clock time.
    pub fn captured_now(frame_id: FrameId, payload: impl Into<Bytes>) -> Self {
        Self::new(frame_id, current_timestamp_us(), payload)
    }

    /// Size of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` for a zero-byte payload.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// One datagram-sized slice of a [`Frame`].
///
/// Invariants for a well-formed chunk: `chunk_count >= 1` and
/// `chunk_index < chunk_count`.  The chunker only produces well-formed chunks;
/// the reassembly engine rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub frame_id: FrameId,
    /// Zero-based position of this slice within the frame.
    pub chunk_index: u32,
    /// Total number of slices in the frame.
    pub chunk_count: u32,
    pub payload: Bytes,
    /// Truncated BLAKE3 digest of `payload`, if checksums are enabled.
    pub checksum: Option<u32>,
}

impl Chunk {
    /// Returns `true` if the index and count describe a position inside a
    /// non-empty frame.
    pub fn has_valid_metadata(&self) -> bool {
        self.chunk_count >= 1 && self.chunk_index < self.chunk_count
    }
}

/// Microseconds since the Unix epoch, or 0 if the system clock is before it.
pub fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
