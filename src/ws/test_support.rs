//! Shared fixtures for the dispatch tests

use crate::ipc::ClientMessage;
use crate::shared::{Geometry, Point};
use crate::ws::accelerator::{AcceleratorKey, AcceleratorPhase};
use crate::ws::event::Event;
use crate::ws::event_dispatcher::EventDispatcherDelegate;
use crate::ws::ids::{ClientId, CursorId, WindowId};
use crate::ws::platform::{ClientTransport, PlatformDisplay};
use crate::ws::window::WindowKey;
use crate::ws::window_tree::WindowTree;

/// A single 1000x1000 display root with client-owned children
pub struct TestScene {
    pub tree: WindowTree,
    pub root: WindowKey,
}

impl TestScene {
    pub const OWNER: ClientId = ClientId(1);

    pub fn new() -> Self {
        let mut tree = WindowTree::new();
        let root = tree
            .create_display_root(WindowId::new(ClientId::SERVER, 1), Geometry::new(0, 0, 1000, 1000))
            .unwrap();
        Self { tree, root }
    }

    /// Visible child of the root owned by `OWNER`
    pub fn window(&mut self, local_id: u32, bounds: Geometry) -> WindowKey {
        let root = self.root;
        self.child(root, local_id, bounds)
    }

    pub fn child(&mut self, parent: WindowKey, local_id: u32, bounds: Geometry) -> WindowKey {
        let key = self
            .tree
            .create_window(WindowId::new(Self::OWNER, local_id), bounds)
            .unwrap();
        self.tree.add_child(parent, key).unwrap();
        self.tree.set_visible(key, true).unwrap();
        key
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DelegateCall {
    Accelerator(u32, AcceleratorPhase),
    Focus(WindowKey),
    SetNativeCapture(WindowKey),
    ReleaseNativeCapture,
    CaptureLost(WindowKey, ClientId),
    CursorLocation(Point),
    Cursor(CursorId),
    Dispatch(WindowKey, ClientId, Event, Option<AcceleratorKey>),
}

/// Delegate that records every call and resolves all locations to one root
pub struct RecordingDelegate {
    pub root: WindowKey,
    pub focused: Option<WindowKey>,
    pub calls: Vec<DelegateCall>,
    pub not_found: usize,
}

impl RecordingDelegate {
    pub fn new(root: WindowKey) -> Self {
        Self { root, focused: None, calls: Vec::new(), not_found: 0 }
    }

    pub fn dispatched_calls(&self) -> Vec<(WindowKey, ClientId, Event, Option<AcceleratorKey>)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                DelegateCall::Dispatch(window, client, event, accelerator) => {
                    Some((*window, *client, event.clone(), *accelerator))
                }
                _ => None,
            })
            .collect()
    }

    pub fn dispatched(&self) -> Vec<(WindowKey, Event)> {
        self.dispatched_calls()
            .into_iter()
            .map(|(window, _, event, _)| (window, event))
            .collect()
    }

    pub fn accelerators(&self) -> Vec<(u32, AcceleratorPhase)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                DelegateCall::Accelerator(id, phase) => Some((*id, *phase)),
                _ => None,
            })
            .collect()
    }

    pub fn cursors(&self) -> Vec<CursorId> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                DelegateCall::Cursor(cursor) => Some(*cursor),
                _ => None,
            })
            .collect()
    }
}

impl EventDispatcherDelegate for RecordingDelegate {
    fn on_accelerator(&mut self, accelerator_id: u32, _event: &Event, phase: AcceleratorPhase) {
        self.calls.push(DelegateCall::Accelerator(accelerator_id, phase));
    }

    fn set_focused_window_from_event_dispatcher(&mut self, window: WindowKey) {
        self.focused = Some(window);
        self.calls.push(DelegateCall::Focus(window));
    }

    fn focused_window_for_event_dispatcher(&self) -> Option<WindowKey> {
        self.focused
    }

    fn set_native_capture(&mut self, window: WindowKey) {
        self.calls.push(DelegateCall::SetNativeCapture(window));
    }

    fn release_native_capture(&mut self) {
        self.calls.push(DelegateCall::ReleaseNativeCapture);
    }

    fn on_capture_lost(&mut self, window: WindowKey, client_id: ClientId) {
        self.calls.push(DelegateCall::CaptureLost(window, client_id));
    }

    fn on_mouse_cursor_location_changed(&mut self, screen_location: Point) {
        self.calls.push(DelegateCall::CursorLocation(screen_location));
    }

    fn update_native_cursor(&mut self, cursor: CursorId) {
        self.calls.push(DelegateCall::Cursor(cursor));
    }

    fn dispatch_input_event_to_window(
        &mut self,
        target: WindowKey,
        client_id: ClientId,
        event: &Event,
        accelerator: Option<AcceleratorKey>,
    ) {
        self.calls.push(DelegateCall::Dispatch(target, client_id, event.clone(), accelerator));
    }

    fn root_window_containing(&self, _screen_location: Point) -> Option<WindowKey> {
        Some(self.root)
    }

    fn on_event_target_not_found(&mut self, _event: &Event) {
        self.not_found += 1;
    }
}

/// Transport that records every outgoing message
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub messages: Vec<(ClientId, ClientMessage)>,
}

impl RecordingTransport {
    pub fn take(&mut self) -> Vec<(ClientId, ClientMessage)> {
        std::mem::take(&mut self.messages)
    }

    /// `(client, event_id, window)` of every input event sent so far
    pub fn input_events(&self) -> Vec<(ClientId, u32, WindowId)> {
        self.messages
            .iter()
            .filter_map(|(client, message)| match message {
                ClientMessage::InputEvent { event_id, window, .. } => Some((*client, *event_id, *window)),
                _ => None,
            })
            .collect()
    }

    pub fn accelerators(&self) -> Vec<(u32, Option<u32>)> {
        self.messages
            .iter()
            .filter_map(|(_, message)| match message {
                ClientMessage::Accelerator { accelerator_id, ack_id, .. } => Some((*accelerator_id, *ack_id)),
                _ => None,
            })
            .collect()
    }
}

impl ClientTransport for RecordingTransport {
    fn send(&mut self, client_id: ClientId, message: ClientMessage) {
        self.messages.push((client_id, message));
    }
}

#[derive(Debug, Default)]
pub struct RecordingPlatform {
    pub captured: bool,
    pub cursor: Option<CursorId>,
}

impl PlatformDisplay for RecordingPlatform {
    fn set_capture(&mut self) {
        self.captured = true;
    }

    fn release_capture(&mut self) {
        self.captured = false;
    }

    fn update_cursor(&mut self, cursor: CursorId) {
        self.cursor = Some(cursor);
    }
}
