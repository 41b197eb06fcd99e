//! Splits a [`Frame`] into datagram-sized [`Chunk`]s.
//!
//! Chunking is deterministic and lossless: concatenating the payloads of the
//! produced chunks in `chunk_index` order reproduces the frame payload exactly.

use thiserror::Error;

use crate::domain::checksum::ChecksumMode;
use crate::domain::frame::{Chunk, Frame, FrameId};
use crate::protocol::datagram::{CHECKSUM_SIZE, CHUNK_HEADER_SIZE, MAX_UDP_PAYLOAD};

/// Largest chunk payload that still fits in one UDP datagram with the chunk
/// header and checksum trailer.
pub const MAX_CHUNK_PAYLOAD: usize = MAX_UDP_PAYLOAD - CHUNK_HEADER_SIZE - CHECKSUM_SIZE;

/// Errors produced while chunking a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    /// The configured payload limit is zero or does not fit in a datagram.
    #[error("max payload size must be between 1 and {max} bytes, got {got}")]
    InvalidMaxPayload { got: usize, max: usize },

    /// The frame would need more chunks than a `u32` can count.
    #[error("frame {frame_id} of {len} bytes needs more than u32::MAX chunks")]
    TooManyChunks { frame_id: FrameId, len: usize },
}

/// Reusable chunking configuration.
///
/// Validating the payload limit once at construction means the per-frame
/// path only has to deal with frame-specific failures.
///
/// # Examples
///
/// ```rust
/// use srvnc_core::domain::chunker::Chunker;
/// use srvnc_core::domain::checksum::ChecksumMode;
/// use srvnc_core::Frame;
///
/// let chunker = Chunker::new(4, ChecksumMode::Disabled).unwrap();
/// let chunks = chunker.chunk(&Frame::new(7, 0, b"0123456789".to_vec())).unwrap();
/// assert_eq!(chunks.len(), 3);
/// assert_eq!(&chunks[2].payload[..], b"89");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_payload_size: usize,
    checksum: ChecksumMode,
}

impl Chunker {
    /// Creates a chunker.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::InvalidMaxPayload`] if `max_payload_size` is zero
    /// or larger than [`MAX_CHUNK_PAYLOAD`].
    pub fn new(max_payload_size: usize, checksum: ChecksumMode) -> Result<Self, ChunkError> {
        if max_payload_size == 0 || max_payload_size > MAX_CHUNK_PAYLOAD {
            return Err(ChunkError::InvalidMaxPayload {
                got: max_payload_size,
                max: MAX_CHUNK_PAYLOAD,
            });
        }
        Ok(Self {
            max_payload_size,
            checksum,
        })
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn checksum_mode(&self) -> ChecksumMode {
        self.checksum
    }

    /// Number of chunks a payload of `len` bytes splits into.
    ///
    /// An empty payload still produces one (empty) chunk so that the viewer
    /// learns about the frame.
    pub fn chunk_count_for(&self, len: usize) -> usize {
        len.div_ceil(self.max_payload_size).max(1)
    }

    /// Splits `frame` into chunks.
    ///
    /// Each chunk's payload is a zero-copy slice of the frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::TooManyChunks`] if the chunk count overflows `u32`.
    pub fn chunk(&self, frame: &Frame) -> Result<Vec<Chunk>, ChunkError> {
        let len = frame.payload.len();
        let count = self.chunk_count_for(len);
        let chunk_count = u32::try_from(count).map_err(|_| ChunkError::TooManyChunks {
            frame_id: frame.frame_id,
            len,
        })?;

        let chunks = (0..chunk_count)
            .map(|index| {
                let start = index as usize * self.max_payload_size;
                let end = (start + self.max_payload_size).min(len);
                let payload = frame.payload.slice(start..end);
                Chunk {
                    frame_id: frame.frame_id,
                    chunk_index: index,
                    chunk_count,
                    checksum: self.checksum.compute(&payload),
                    payload,
                }
            })
            .collect();
        Ok(chunks)
    }
}

/// Splits `frame` into chunks of at most `max_payload_size` bytes without
/// checksums.
///
/// # Errors
///
/// See [`Chunker::new`] and [`Chunker::chunk`].
pub fn chunk_frame(frame: &Frame, max_payload_size: usize) -> Result<Vec<Chunk>, ChunkError> {
    Chunker::new(max_payload_size, ChecksumMode::Disabled)?.chunk(frame)
}
