//! Area Window Server
//!
//! Input event dispatch core of the Area window server, plus the
//! configuration and scenario replay used by the `area-ws` binary.

pub mod config;
pub mod error;
pub mod ipc;
pub mod replay;
pub mod shared;
pub mod ws;

pub use error::{WsError, WsResult};
pub use ws::WindowServer;
