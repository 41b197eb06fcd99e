//! Recording display sink for tests.

use std::sync::{Mutex, MutexGuard};

use srvnc_core::{Frame, FrameId};

use crate::application::receive_frames::{DisplayError, DisplaySink};

#[derive(Debug, Default)]
pub struct RecordingDisplay {
    frames: Mutex<Vec<Frame>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every frame shown so far.
    pub fn frames(&self) -> Vec<Frame> {
        self.lock().clone()
    }

    pub fn frame_ids(&self) -> Vec<FrameId> {
        self.lock().iter().map(|f| f.frame_id).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Frame>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DisplaySink for RecordingDisplay {
    fn show(&self, frame: Frame) -> Result<(), DisplayError> {
        self.lock().push(frame);
        Ok(())
    }
}
