//! Input Events
//!
//! Pointer (mouse, touch, pen) and key events as delivered by the platform
//! display, plus the two-valued result clients report back.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::shared::Point;

/// Pointer id used for every mouse event; touch points use their own ids
pub const MOUSE_POINTER_ID: i32 = i32::MAX;

bitflags! {
    /// Modifier, button and origin flags carried by every event
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EventFlags: u32 {
        const SHIFT_DOWN          = 1 << 0;
        const CONTROL_DOWN        = 1 << 1;
        const ALT_DOWN            = 1 << 2;
        const COMMAND_DOWN        = 1 << 3;
        const CAPS_LOCK_ON        = 1 << 4;
        const NUM_LOCK_ON         = 1 << 5;
        const LEFT_MOUSE_BUTTON   = 1 << 6;
        const MIDDLE_MOUSE_BUTTON = 1 << 7;
        const RIGHT_MOUSE_BUTTON  = 1 << 8;
        const BACK_MOUSE_BUTTON   = 1 << 9;
        const FORWARD_MOUSE_BUTTON = 1 << 10;
        const IS_SYNTHESIZED      = 1 << 11;
    }
}

impl EventFlags {
    /// Modifiers that take part in accelerator matching
    pub const ACCELERATOR_MODIFIERS: EventFlags = EventFlags::SHIFT_DOWN
        .union(EventFlags::CONTROL_DOWN)
        .union(EventFlags::ALT_DOWN)
        .union(EventFlags::COMMAND_DOWN);

    pub const MOUSE_BUTTONS: EventFlags = EventFlags::LEFT_MOUSE_BUTTON
        .union(EventFlags::MIDDLE_MOUSE_BUTTON)
        .union(EventFlags::RIGHT_MOUSE_BUTTON)
        .union(EventFlags::BACK_MOUSE_BUTTON)
        .union(EventFlags::FORWARD_MOUSE_BUTTON);

    /// Number of mouse buttons held according to these flags
    pub fn mouse_buttons_down(self) -> u32 {
        self.intersection(Self::MOUSE_BUTTONS).bits().count_ones()
    }
}

/// Event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PointerDown,
    PointerMoved,
    PointerUp,
    PointerCancelled,
    PointerExited,
    PointerWheelChanged,
    KeyPressed,
    KeyReleased,
}

impl EventType {
    pub fn is_pointer(self) -> bool {
        !self.is_key()
    }

    pub fn is_key(self) -> bool {
        matches!(self, EventType::KeyPressed | EventType::KeyReleased)
    }
}

/// Kind of device behind a pointer event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerKind {
    #[default]
    Mouse,
    Touch,
    Pen,
}

/// Platform-independent key code (Windows virtual key numbering)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub const BACK: KeyCode = KeyCode(0x08);
    pub const TAB: KeyCode = KeyCode(0x09);
    pub const RETURN: KeyCode = KeyCode(0x0D);
    pub const ESCAPE: KeyCode = KeyCode(0x1B);
    pub const SPACE: KeyCode = KeyCode(0x20);
    pub const A: KeyCode = KeyCode(0x41);
    pub const C: KeyCode = KeyCode(0x43);
    pub const L: KeyCode = KeyCode(0x4C);
    pub const S: KeyCode = KeyCode(0x53);
    pub const T: KeyCode = KeyCode(0x54);
    pub const V: KeyCode = KeyCode(0x56);
    pub const F4: KeyCode = KeyCode(0x73);
}

/// Pointer-specific payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerData {
    #[serde(default)]
    pub pointer_kind: PointerKind,
    #[serde(default = "mouse_pointer_id")]
    pub pointer_id: i32,
    /// Location in the coordinate space of the receiver. Platform events
    /// carry screen coordinates; dispatched events carry window-local ones.
    pub location: Point,
    /// Location in screen coordinates, never rewritten
    pub root_location: Point,
    #[serde(default)]
    pub changed_button_flags: EventFlags,
    #[serde(default)]
    pub wheel_offset: Point,
}

fn mouse_pointer_id() -> i32 {
    MOUSE_POINTER_ID
}

/// Key-specific payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyData {
    pub key_code: KeyCode,
    /// Synthesized character event (never matched against accelerators)
    #[serde(default)]
    pub is_char: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventData {
    Pointer(PointerData),
    Key(KeyData),
}

/// An input event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    #[serde(default)]
    pub flags: EventFlags,
    /// Milliseconds since an arbitrary epoch chosen by the platform
    #[serde(default)]
    pub time_ms: u64,
    pub data: EventData,
}

impl Event {
    /// Create a pointer event at a screen location
    pub fn pointer(
        event_type: EventType,
        pointer_kind: PointerKind,
        pointer_id: i32,
        location: Point,
        flags: EventFlags,
    ) -> Self {
        Self {
            event_type,
            flags,
            time_ms: 0,
            data: EventData::Pointer(PointerData {
                pointer_kind,
                pointer_id,
                location,
                root_location: location,
                changed_button_flags: EventFlags::empty(),
                wheel_offset: Point::default(),
            }),
        }
    }

    /// Create a mouse event at a screen location
    pub fn mouse(event_type: EventType, location: Point, flags: EventFlags) -> Self {
        Self::pointer(event_type, PointerKind::Mouse, MOUSE_POINTER_ID, location, flags)
    }

    /// Create a touch event at a screen location
    pub fn touch(event_type: EventType, pointer_id: i32, location: Point) -> Self {
        Self::pointer(event_type, PointerKind::Touch, pointer_id, location, EventFlags::empty())
    }

    /// Create a key event
    pub fn key(event_type: EventType, key_code: KeyCode, flags: EventFlags) -> Self {
        Self {
            event_type,
            flags,
            time_ms: 0,
            data: EventData::Key(KeyData { key_code, is_char: false }),
        }
    }

    /// Synthetic exit sent to the previous hover target of the mouse
    pub fn pointer_exited_from(event: &Event) -> Self {
        let location = event.root_location().unwrap_or_default();
        let mut exit = Self::mouse(EventType::PointerExited, location, event.flags);
        exit.time_ms = event.time_ms;
        exit
    }

    pub fn is_key_event(&self) -> bool {
        matches!(self.data, EventData::Key(_))
    }

    pub fn is_mouse_pointer_event(&self) -> bool {
        matches!(
            self.data,
            EventData::Pointer(PointerData { pointer_kind: PointerKind::Mouse, .. })
        )
    }

    pub fn pointer_data(&self) -> Option<&PointerData> {
        match &self.data {
            EventData::Pointer(data) => Some(data),
            EventData::Key(_) => None,
        }
    }

    pub fn key_data(&self) -> Option<&KeyData> {
        match &self.data {
            EventData::Key(data) => Some(data),
            EventData::Pointer(_) => None,
        }
    }

    pub fn pointer_id(&self) -> Option<i32> {
        self.pointer_data().map(|data| data.pointer_id)
    }

    pub fn location(&self) -> Option<Point> {
        self.pointer_data().map(|data| data.location)
    }

    pub fn root_location(&self) -> Option<Point> {
        self.pointer_data().map(|data| data.root_location)
    }

    /// Rewrite the receiver-relative location; no-op for key events
    pub fn set_location(&mut self, location: Point) {
        if let EventData::Pointer(data) = &mut self.data {
            data.location = location;
        }
    }

    pub fn key_code(&self) -> Option<KeyCode> {
        self.key_data().map(|data| data.key_code)
    }

    pub fn is_char(&self) -> bool {
        self.key_data().is_some_and(|data| data.is_char)
    }

    /// Returns true if `newer` may replace `self` in the event queue.
    /// Only consecutive moves of the same pointer with identical flags qualify.
    pub fn can_coalesce_with(&self, newer: &Event) -> bool {
        if self.event_type != newer.event_type || self.flags != newer.flags {
            return false;
        }
        if self.event_type != EventType::PointerMoved {
            return false;
        }
        self.pointer_id().is_some() && self.pointer_id() == newer.pointer_id()
    }
}

/// Outcome a client reports for a dispatched event or accelerator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventResult {
    Handled,
    Unhandled,
}
