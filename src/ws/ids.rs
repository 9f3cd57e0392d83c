//! Identifiers
//!
//! Client, window, user and cursor ids shared by the dispatch core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Id of a connected client (a process talking to the window server)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u32);

impl ClientId {
    /// The window server itself owns display roots and window-manager roots
    pub const SERVER: ClientId = ClientId(0);
    /// No client; used when capture is released
    pub const INVALID: ClientId = ClientId(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite window id: the creating client plus a client-local id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId {
    pub client_id: ClientId,
    pub local_id: u32,
}

impl WindowId {
    pub const fn new(client_id: ClientId, local_id: u32) -> Self {
        Self { client_id, local_id }
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.client_id.0, self.local_id)
    }
}

/// Id of a user session; each user gets its own window manager
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Id of a display (monitor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(pub u32);

/// Cursor shape requested from the platform display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorId(pub u32);

impl CursorId {
    pub const POINTER: CursorId = CursorId(0);
    pub const HAND: CursorId = CursorId(1);
    pub const TEXT: CursorId = CursorId(2);
    pub const MOVE: CursorId = CursorId(3);
}
