//! Synthetic capture source producing JPEG-shaped opaque payloads.
//!
//! Each frame starts with the JPEG start-of-image marker and ends with the
//! end-of-image marker, with a fill pattern derived from the frame counter in
//! between.  Viewers can therefore check that a displayed payload arrived
//! intact without decoding anything.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use srvnc_core::Frame;
use tracing::trace;

use crate::application::stream_coordinator::{CaptureError, CaptureSource};

/// JPEG start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Generates frames of a fixed size, optionally stopping after a limit.
#[derive(Debug)]
pub struct SyntheticCapture {
    frame_bytes: usize,
    produced: u64,
    limit: Option<u64>,
    interval: Option<Duration>,
}

impl SyntheticCapture {
    /// `frame_bytes` is clamped to at least the two markers.
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes: frame_bytes.max(SOI.len() + EOI.len()),
            produced: 0,
            limit: None,
            interval: None,
        }
    }

    /// Ends the source after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Last interval the coordinator announced.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    fn render(&self) -> Bytes {
        let fill = self.frame_bytes - SOI.len() - EOI.len();
        let seed = self.produced as u8;
        let mut buf = BytesMut::with_capacity(self.frame_bytes);
        buf.put_slice(&SOI);
        for i in 0..fill {
            // Avoid 0xFF so the end marker stays unique.
            buf.put_u8(seed.wrapping_add(i as u8) % 0xFF);
        }
        buf.put_slice(&EOI);
        buf.freeze()
    }
}

/// Returns `true` if `payload` is a complete synthetic frame.
pub fn is_well_formed(payload: &[u8]) -> bool {
    payload.len() >= SOI.len() + EOI.len()
        && payload.starts_with(&SOI)
        && payload.ends_with(&EOI)
        && !payload[SOI.len()..payload.len() - EOI.len()].contains(&0xFF)
}

#[async_trait]
impl CaptureSource for SyntheticCapture {
    async fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Err(CaptureError::Ended);
        }
        let payload = self.render();
        self.produced += 1;
        trace!(bytes = payload.len(), n = self.produced, "synthetic frame");
        Ok(Frame::captured_now(0, payload))
    }

    fn on_pacing(&mut self, interval: Duration) {
        self.interval = Some(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_have_requested_size_and_markers() {
        // Arrange
        let mut capture = SyntheticCapture::new(5_000);

        // Act
        let frame = capture.next_frame().await.expect("frame");

        // Assert
        assert_eq!(frame.len(), 5_000);
        assert!(is_well_formed(&frame.payload));
    }

    #[tokio::test]
    async fn test_consecutive_frames_differ() {
        let mut capture = SyntheticCapture::new(64);
        let a = capture.next_frame().await.expect("a");
        let b = capture.next_frame().await.expect("b");
        assert_ne!(a.payload, b.payload);
    }

    #[test]
    fn test_limit_ends_the_source() {
        let mut capture = SyntheticCapture::new(16).with_limit(2);
        tokio_test::block_on(async {
            tokio_test::assert_ok!(capture.next_frame().await);
            tokio_test::assert_ok!(capture.next_frame().await);
            assert!(matches!(capture.next_frame().await, Err(CaptureError::Ended)));
        });
        assert_eq!(capture.produced(), 2);
    }

    #[test]
    fn test_tiny_size_is_clamped_to_markers() {
        let capture = SyntheticCapture::new(0);
        assert!(is_well_formed(&capture.render()));
    }

    #[test]
    fn test_truncated_payload_is_not_well_formed() {
        let capture = SyntheticCapture::new(32);
        let payload = capture.render();
        assert!(!is_well_formed(&payload[..20]));
    }
}
