//! Recording injection sink for tests.
//!
//! Every applied event is pushed into a `Mutex<Vec<_>>` so assertions can
//! check exactly what arrived and in what order.  Set `fail_custom` to make
//! custom events fail, which exercises the "log and carry on" path.
//!
//! ```ignore
//! let sink = Arc::new(RecordingSink::new());
//! let use_case = InjectInputUseCase::new(sink.clone());
//! use_case.handle(&event);
//! assert_eq!(sink.events().len(), 1);
//! ```

use std::sync::Mutex;

use srvnc_core::{ControlEvent, EventKind};

use crate::application::inject_input::{InjectionError, InjectionSink};

#[derive(Debug, Default)]
pub struct RecordingSink {
    applied: Mutex<Vec<ControlEvent>>,
    /// When `true`, `Custom` events are refused with `Unsupported`.
    pub fail_custom: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_custom() -> Self {
        Self {
            fail_custom: true,
            ..Self::default()
        }
    }

    /// Snapshot of every event applied so far.
    pub fn events(&self) -> Vec<ControlEvent> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ControlEvent>> {
        self.applied.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InjectionSink for RecordingSink {
    fn apply(&self, event: &ControlEvent) -> Result<(), InjectionError> {
        if self.fail_custom && matches!(event.kind, EventKind::Custom(_)) {
            return Err(InjectionError::Unsupported("custom"));
        }
        self.lock().push(event.clone());
        Ok(())
    }
}
