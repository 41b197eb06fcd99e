//! Sink that writes each event to the log instead of injecting it.

use srvnc_core::{ControlEvent, EventKind};
use tracing::info;

use crate::application::inject_input::{InjectionError, InjectionSink};

#[derive(Debug, Default)]
pub struct LoggingSink;

impl InjectionSink for LoggingSink {
    fn apply(&self, event: &ControlEvent) -> Result<(), InjectionError> {
        match &event.kind {
            EventKind::KeyDown { key_code, modifiers } | EventKind::KeyUp { key_code, modifiers } => {
                info!(
                    event_id = event.event_id,
                    kind = event.kind.name(),
                    key_code,
                    modifiers = modifiers.0,
                    "input event"
                );
            }
            EventKind::MouseMove { x, y } => {
                info!(event_id = event.event_id, x, y, "mouse move");
            }
            EventKind::MouseButton { button, pressed } => {
                info!(event_id = event.event_id, ?button, pressed, "mouse button");
            }
            EventKind::Scroll { delta_x, delta_y } => {
                info!(event_id = event.event_id, delta_x, delta_y, "scroll");
            }
            EventKind::Custom(bytes) => {
                info!(
                    event_id = event.event_id,
                    len = bytes.len(),
                    "custom command: {}",
                    String::from_utf8_lossy(bytes)
                );
            }
        }
        Ok(())
    }
}
