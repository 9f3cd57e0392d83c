//! Window Server Core
//!
//! Input event dispatch for a multi-client window server: the window tree,
//! accelerators, modal windows, pointer targets, per-user dispatch state
//! and the server that ties them together.

pub mod accelerator;
pub mod display;
pub mod event;
pub mod event_dispatcher;
pub mod ids;
pub mod modal;
pub mod platform;
pub mod pointer_target;
pub mod server;
pub mod window;
pub mod window_manager_state;
pub mod window_tree;

#[cfg(test)]
mod test_support;

pub use accelerator::{Accelerator, AcceleratorKey, AcceleratorPhase, EventMatcher};
pub use display::{Display, DisplayManager, UserDisplayManager};
pub use event::{Event, EventFlags, EventResult, EventType, KeyCode, PointerKind};
pub use event_dispatcher::{EventDispatcher, EventDispatcherDelegate};
pub use ids::{ClientId, CursorId, DisplayId, UserId, WindowId};
pub use modal::ModalWindowController;
pub use platform::{ClientTransport, PlatformDisplay};
pub use server::WindowServer;
pub use window::{ServerWindow, WindowKey};
pub use window_manager_state::{EventDispatchPhase, WindowManagerState};
pub use window_tree::WindowTree;
