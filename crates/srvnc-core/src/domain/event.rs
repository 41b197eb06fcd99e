//! Viewer input events carried over the reliable control channel.
//!
//! Unlike frames, events must never be dropped, duplicated, or reordered:
//! a lost key-up leaves a key stuck on the host.  That is why they travel on
//! the control connection rather than as datagrams.

use serde::{Deserialize, Serialize};

use crate::domain::frame::current_timestamp_us;

/// Identifier of an event within one control connection.
pub type EventId = u64;

/// Bitmask of modifier keys held while a key event occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModifierFlags(pub u8);

impl ModifierFlags {
    pub const CTRL: u8 = 1 << 0;
    pub const SHIFT: u8 = 1 << 1;
    pub const ALT: u8 = 1 << 2;
    pub const META: u8 = 1 << 3;

    pub fn ctrl(&self) -> bool {
        self.0 & Self::CTRL != 0
    }

    pub fn shift(&self) -> bool {
        self.0 & Self::SHIFT != 0
    }

    pub fn alt(&self) -> bool {
        self.0 & Self::ALT != 0
    }

    pub fn meta(&self) -> bool {
        self.0 & Self::META != 0
    }
}

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MouseButton {
    Left = 0x01,
    Right = 0x02,
    Middle = 0x03,
    Back = 0x04,
    Forward = 0x05,
}

impl TryFrom<u8> for MouseButton {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MouseButton::Left),
            0x02 => Ok(MouseButton::Right),
            0x03 => Ok(MouseButton::Middle),
            0x04 => Ok(MouseButton::Back),
            0x05 => Ok(MouseButton::Forward),
            _ => Err(()),
        }
    }
}

/// What the viewer's user did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    KeyDown { key_code: u16, modifiers: ModifierFlags },
    KeyUp { key_code: u16, modifiers: ModifierFlags },
    /// Absolute pointer position in host screen coordinates.
    MouseMove { x: i32, y: i32 },
    MouseButton { button: MouseButton, pressed: bool },
    Scroll { delta_x: i16, delta_y: i16 },
    /// Opaque application-defined command bytes.
    Custom(Vec<u8>),
}

impl EventKind {
    /// Wire discriminant used by the control codec.
    pub fn tag(&self) -> u8 {
        match self {
            EventKind::KeyDown { .. } => 0x01,
            EventKind::KeyUp { .. } => 0x02,
            EventKind::MouseMove { .. } => 0x03,
            EventKind::MouseButton { .. } => 0x04,
            EventKind::Scroll { .. } => 0x05,
            EventKind::Custom(_) => 0x06,
        }
    }

    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::KeyDown { .. } => "key_down",
            EventKind::KeyUp { .. } => "key_up",
            EventKind::MouseMove { .. } => "mouse_move",
            EventKind::MouseButton { .. } => "mouse_button",
            EventKind::Scroll { .. } => "scroll",
            EventKind::Custom(_) => "custom",
        }
    }
}

/// One input event.
///
/// `event_id` is assigned by the control channel when the event is sent, so
/// input sources can build events with [`ControlEvent::new`] and leave the id
/// at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub event_id: EventId,
    /// Microseconds since the Unix epoch at which the input happened.
    pub timestamp_us: u64,
    pub kind: EventKind,
}

impl ControlEvent {
    /// Creates an unnumbered event stamped with the current time.
    pub fn new(kind: EventKind) -> Self {
        Self {
            event_id: 0,
            timestamp_us: current_timestamp_us(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_flags_report_individual_bits() {
        let flags = ModifierFlags(ModifierFlags::CTRL | ModifierFlags::META);
        assert!(flags.ctrl());
        assert!(flags.meta());
        assert!(!flags.shift());
        assert!(!flags.alt());
    }

    #[test]
    fn test_mouse_button_rejects_unknown_code() {
        assert_eq!(MouseButton::try_from(0x03), Ok(MouseButton::Middle));
        assert!(MouseButton::try_from(0x09).is_err());
    }

    #[test]
    fn test_event_tags_are_distinct() {
        let kinds = [
            EventKind::KeyDown { key_code: 4, modifiers: ModifierFlags::default() },
            EventKind::KeyUp { key_code: 4, modifiers: ModifierFlags::default() },
            EventKind::MouseMove { x: 0, y: 0 },
            EventKind::MouseButton { button: MouseButton::Left, pressed: true },
            EventKind::Scroll { delta_x: 0, delta_y: -1 },
            EventKind::Custom(vec![1, 2]),
        ];
        let mut tags: Vec<u8> = kinds.iter().map(EventKind::tag).collect();
        tags.dedup();
        assert_eq!(tags.len(), kinds.len());
    }
}
