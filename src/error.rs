//! Error types for the dispatch core
//!
//! Every variant is a caller-correctable policy rejection. Stale acks and
//! timeouts are not errors; they are logged and ignored.

use thiserror::Error;

use crate::ws::ids::{UserId, WindowId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WsError {
    #[error("window is unknown or has been destroyed")]
    WindowNotFound,

    #[error("window id {0} is already in use")]
    DuplicateWindowId(WindowId),

    #[error("window {child} cannot be parented to {parent}")]
    InvalidHierarchy { parent: WindowId, child: WindowId },

    #[error("window {0} is already a system modal window")]
    AlreadyModal(WindowId),

    #[error("window {0} is blocked by a modal window")]
    BlockedByModal(WindowId),

    #[error("accelerator {0} conflicts with a registered accelerator")]
    DuplicateAccelerator(u32),

    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error("user {0} already has a window manager")]
    DuplicateUser(UserId),
}

pub type WsResult<T> = std::result::Result<T, WsError>;
