//! Accelerators
//!
//! Keyboard shortcuts registered by the window manager. An accelerator binds
//! an id to an `EventMatcher`; it fires either before the event reaches its
//! target (pre-target) or only when the target leaves it unhandled
//! (post-target).

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::ws::event::{Event, EventFlags, EventType, KeyCode};

new_key_type! {
    /// Weak handle to a registered accelerator; resolves to `None` after removal
    pub struct AcceleratorKey;
}

/// When an accelerator is matched relative to normal dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceleratorPhase {
    #[default]
    PreTarget,
    PostTarget,
}

/// Predicate over key events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMatcher {
    #[serde(default = "default_event_type")]
    pub event_type: EventType,
    pub key_code: KeyCode,
    /// Required accelerator modifiers; compared exactly after masking
    #[serde(default)]
    pub flags: EventFlags,
    /// Modifiers that are disregarded when comparing
    #[serde(default)]
    pub ignore_flags: EventFlags,
    #[serde(default)]
    pub phase: AcceleratorPhase,
}

fn default_event_type() -> EventType {
    EventType::KeyPressed
}

impl EventMatcher {
    /// Pre-target matcher for a key press with exactly `flags` held
    pub fn key_press(key_code: KeyCode, flags: EventFlags) -> Self {
        Self {
            event_type: EventType::KeyPressed,
            key_code,
            flags,
            ignore_flags: EventFlags::empty(),
            phase: AcceleratorPhase::PreTarget,
        }
    }

    pub fn with_phase(mut self, phase: AcceleratorPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_ignore_flags(mut self, ignore_flags: EventFlags) -> Self {
        self.ignore_flags = ignore_flags;
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        let Some(key) = event.key_data() else {
            return false;
        };
        if key.is_char || event.event_type != self.event_type || key.key_code != self.key_code {
            return false;
        }
        let relevant = EventFlags::ACCELERATOR_MODIFIERS.difference(self.ignore_flags);
        event.flags.intersection(relevant) == self.flags.intersection(relevant)
    }
}

#[derive(Debug, Clone)]
pub struct Accelerator {
    id: u32,
    matcher: EventMatcher,
}

impl Accelerator {
    pub fn new(id: u32, matcher: EventMatcher) -> Self {
        Self { id, matcher }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn phase(&self) -> AcceleratorPhase {
        self.matcher.phase
    }

    pub fn matcher(&self) -> &EventMatcher {
        &self.matcher
    }

    pub fn matches_event(&self, event: &Event, phase: AcceleratorPhase) -> bool {
        self.matcher.phase == phase && self.matcher.matches(event)
    }

    /// Two accelerators conflict if they would match the same events in the same phase
    pub fn equal_event_matcher(&self, other: &Accelerator) -> bool {
        self.matcher == other.matcher
    }
}
