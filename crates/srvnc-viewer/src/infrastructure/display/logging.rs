//! Display sink that logs frames instead of drawing them.

use std::sync::atomic::{AtomicU64, Ordering};

use srvnc_core::{current_timestamp_us, Frame};
use tracing::{debug, info};

use crate::application::receive_frames::{DisplayError, DisplaySink};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Logs one line per shown frame, and a summary every `summary_every` frames.
#[derive(Debug)]
pub struct LoggingDisplay {
    shown: AtomicU64,
    summary_every: u64,
}

impl Default for LoggingDisplay {
    fn default() -> Self {
        Self::new(100)
    }
}

impl LoggingDisplay {
    pub fn new(summary_every: u64) -> Self {
        Self {
            shown: AtomicU64::new(0),
            summary_every: summary_every.max(1),
        }
    }

    pub fn shown(&self) -> u64 {
        self.shown.load(Ordering::Relaxed)
    }
}

/// Whether `payload` is bracketed by JPEG start/end markers.
pub fn looks_like_jpeg(payload: &[u8]) -> bool {
    payload.len() >= 4 && payload.starts_with(&SOI) && payload.ends_with(&EOI)
}

impl DisplaySink for LoggingDisplay {
    fn show(&self, frame: Frame) -> Result<(), DisplayError> {
        let shown = self.shown.fetch_add(1, Ordering::Relaxed) + 1;
        let latency_us = current_timestamp_us().saturating_sub(frame.timestamp_us);
        debug!(
            frame_id = frame.frame_id,
            len = frame.len(),
            jpeg = looks_like_jpeg(&frame.payload),
            latency_us,
            "frame shown"
        );
        if shown % self.summary_every == 0 {
            info!(shown, last_frame = frame.frame_id, "display progress");
        }
        Ok(())
    }
}
