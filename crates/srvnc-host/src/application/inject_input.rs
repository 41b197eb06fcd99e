//! InjectInputUseCase: applies the viewer's control events on the host.
//!
//! Events reach this use case in the exact order the viewer sent them.  A
//! failed injection is logged and counted, and the next event is applied as
//! usual; one bad event never stops the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use srvnc_core::{ControlEvent, EventId};
use thiserror::Error;
use tracing::{trace, warn};

/// Error returned by an [`InjectionSink`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InjectionError {
    /// The sink cannot express this kind of event.
    #[error("unsupported event: {0}")]
    Unsupported(&'static str),
    /// The platform call failed.
    #[error("platform injection failed: {0}")]
    Platform(String),
}

/// OS-facing seam that turns a control event into real input.
///
/// Implementations live in `infrastructure::injection`; tests use the
/// recording sink there or a `mockall` mock.
#[cfg_attr(test, mockall::automock)]
pub trait InjectionSink: Send + Sync {
    fn apply(&self, event: &ControlEvent) -> Result<(), InjectionError>;
}

/// Forwards events to the injection sink and keeps per-session counters.
pub struct InjectInputUseCase {
    sink: Arc<dyn InjectionSink>,
    applied: AtomicU64,
    failed: AtomicU64,
    last_event: AtomicU64,
}

impl InjectInputUseCase {
    pub fn new(sink: Arc<dyn InjectionSink>) -> Self {
        Self {
            sink,
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_event: AtomicU64::new(0),
        }
    }

    /// Applies one event.  Returns `true` if the sink accepted it.
    pub fn handle(&self, event: &ControlEvent) -> bool {
        self.last_event.store(event.event_id, Ordering::Relaxed);
        match self.sink.apply(event) {
            Ok(()) => {
                trace!(event_id = event.event_id, kind = event.kind.name(), "event injected");
                self.applied.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(event_id = event.event_id, kind = event.kind.name(), "injection failed: {e}");
                self.failed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Id of the most recent event handed to the sink, if any.
    pub fn last_event_id(&self) -> Option<EventId> {
        match self.last_event.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::function;
    use mockall::Sequence;
    use srvnc_core::EventKind;

    fn event(id: EventId, kind: EventKind) -> ControlEvent {
        ControlEvent {
            event_id: id,
            timestamp_us: 0,
            kind,
        }
    }

    #[test]
    fn test_events_reach_sink_in_order() {
        // Arrange
        let mut sink = MockInjectionSink::new();
        let mut seq = Sequence::new();
        for expected in 1..=3u64 {
            sink.expect_apply()
                .with(function(move |e: &ControlEvent| e.event_id == expected))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }
        let use_case = InjectInputUseCase::new(Arc::new(sink));

        // Act
        for id in 1..=3 {
            use_case.handle(&event(id, EventKind::MouseMove { x: id as i32, y: 0 }));
        }

        // Assert
        assert_eq!(use_case.applied(), 3);
        assert_eq!(use_case.failed(), 0);
        assert_eq!(use_case.last_event_id(), Some(3));
    }

    #[test]
    fn test_failed_injection_is_counted_and_does_not_block_next_event() {
        // Arrange
        let mut sink = MockInjectionSink::new();
        sink.expect_apply()
            .with(function(|e: &ControlEvent| e.event_id == 1))
            .returning(|_| Err(InjectionError::Unsupported("custom")));
        sink.expect_apply()
            .with(function(|e: &ControlEvent| e.event_id == 2))
            .returning(|_| Ok(()));
        let use_case = InjectInputUseCase::new(Arc::new(sink));

        // Act
        let first = use_case.handle(&event(1, EventKind::Custom(vec![0xAB])));
        let second = use_case.handle(&event(2, EventKind::Scroll { delta_x: 0, delta_y: -1 }));

        // Assert
        assert!(!first);
        assert!(second);
        assert_eq!(use_case.failed(), 1);
        assert_eq!(use_case.applied(), 1);
    }

    #[test]
    fn test_no_events_means_no_last_id() {
        let use_case = InjectInputUseCase::new(Arc::new(MockInjectionSink::new()));
        assert_eq!(use_case.last_event_id(), None);
    }
}
