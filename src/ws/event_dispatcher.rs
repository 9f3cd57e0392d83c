//! Event Dispatcher
//!
//! Resolves an input event to a target window and client. Key events go to
//! the focused window unless a pre-target accelerator claims them. Pointer
//! events are hit-tested, redirected through modal windows and capture, and
//! routed to the window that saw the pointer go down until it goes up.
//!
//! Delivery itself is left to an `EventDispatcherDelegate`.

use slotmap::SlotMap;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::error::{WsError, WsResult};
use crate::shared::Point;
use crate::ws::accelerator::{Accelerator, AcceleratorKey, AcceleratorPhase, EventMatcher};
use crate::ws::event::{Event, EventFlags, EventType, PointerKind};
use crate::ws::ids::{ClientId, CursorId};
use crate::ws::modal::ModalWindowController;
use crate::ws::pointer_target::{PointerTarget, PointerTargetTable};
use crate::ws::window::WindowKey;
use crate::ws::window_tree::WindowTree;

/// Which accelerators an event may be matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceleratorMatchPhase {
    /// Pre-target accelerators first, then normal dispatch with the
    /// post-target accelerator attached
    Any,
    /// The pre-target accelerator was already offered and left unhandled
    PostOnly,
}

/// Hooks the dispatcher calls to deliver events and to reach the platform
pub trait EventDispatcherDelegate {
    fn on_accelerator(&mut self, accelerator_id: u32, event: &Event, phase: AcceleratorPhase);

    fn set_focused_window_from_event_dispatcher(&mut self, window: WindowKey);

    fn focused_window_for_event_dispatcher(&self) -> Option<WindowKey>;

    /// Ask the platform to route all input to this server
    fn set_native_capture(&mut self, window: WindowKey);

    fn release_native_capture(&mut self);

    /// `window` held explicit capture on behalf of `client_id` and lost it
    fn on_capture_lost(&mut self, window: WindowKey, client_id: ClientId);

    fn on_mouse_cursor_location_changed(&mut self, screen_location: Point);

    fn update_native_cursor(&mut self, cursor: CursorId);

    /// Deliver `event` (location already in `target`'s coordinates).
    /// `accelerator` is the post-target accelerator to fire if the client
    /// leaves the event unhandled.
    fn dispatch_input_event_to_window(
        &mut self,
        target: WindowKey,
        client_id: ClientId,
        event: &Event,
        accelerator: Option<AcceleratorKey>,
    );

    /// Client that should receive events for `window`. Non-client events go
    /// to the owner, client-area events to the embedded client if any.
    fn event_target_client_id(&self, tree: &WindowTree, window: WindowKey, in_nonclient_area: bool) -> ClientId {
        tree.target_client(window, in_nonclient_area)
    }

    /// Root window for the display containing `screen_location`
    fn root_window_containing(&self, screen_location: Point) -> Option<WindowKey>;

    fn on_event_target_not_found(&mut self, event: &Event);
}

/// Event dispatcher
#[derive(Debug)]
pub struct EventDispatcher {
    modal_window_controller: ModalWindowController,
    pointer_targets: PointerTargetTable,

    capture_window: Option<WindowKey>,
    capture_window_client_id: ClientId,

    accelerators: SlotMap<AcceleratorKey, Accelerator>,
    accelerator_ids: HashMap<u32, AcceleratorKey>,

    mouse_button_down: bool,
    /// Last mouse location in screen coordinates
    mouse_pointer_last_location: Point,
    /// Window whose cursor is shown
    mouse_cursor_source_window: Option<WindowKey>,
    mouse_cursor_in_non_client_area: bool,
    last_cursor: Option<CursorId>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Create a new event dispatcher
    pub fn new() -> Self {
        Self {
            modal_window_controller: ModalWindowController::new(),
            pointer_targets: PointerTargetTable::new(),
            capture_window: None,
            capture_window_client_id: ClientId::INVALID,
            accelerators: SlotMap::with_key(),
            accelerator_ids: HashMap::new(),
            mouse_button_down: false,
            mouse_pointer_last_location: Point::default(),
            mouse_cursor_source_window: None,
            mouse_cursor_in_non_client_area: false,
            last_cursor: None,
        }
    }

    pub fn modal_window_controller(&self) -> &ModalWindowController {
        &self.modal_window_controller
    }

    pub fn pointer_targets(&self) -> &PointerTargetTable {
        &self.pointer_targets
    }

    pub fn capture_window(&self) -> Option<WindowKey> {
        self.capture_window
    }

    pub fn capture_window_client_id(&self) -> ClientId {
        self.capture_window_client_id
    }

    pub fn mouse_pointer_last_location(&self) -> Point {
        self.mouse_pointer_last_location
    }

    pub fn mouse_cursor_source_window(&self) -> Option<WindowKey> {
        self.mouse_cursor_source_window
    }

    // ------------------------------------------------------------------
    // Accelerators
    // ------------------------------------------------------------------

    /// Register an accelerator. Fails if the id or an equal matcher is taken.
    pub fn add_accelerator(&mut self, id: u32, matcher: EventMatcher) -> WsResult<AcceleratorKey> {
        let accelerator = Accelerator::new(id, matcher);
        let conflict = self.accelerator_ids.contains_key(&id)
            || self
                .accelerators
                .values()
                .any(|existing| existing.equal_event_matcher(&accelerator));
        if conflict {
            debug!("Rejecting accelerator {}: id or matcher already registered", id);
            return Err(WsError::DuplicateAccelerator(id));
        }
        let key = self.accelerators.insert(accelerator);
        self.accelerator_ids.insert(id, key);
        debug!("Added accelerator {} ({:?})", id, matcher);
        Ok(key)
    }

    /// Remove an accelerator; outstanding handles to it stop resolving
    pub fn remove_accelerator(&mut self, id: u32) -> bool {
        match self.accelerator_ids.remove(&id) {
            Some(key) => {
                self.accelerators.remove(key);
                debug!("Removed accelerator {}", id);
                true
            }
            None => false,
        }
    }

    pub fn accelerator(&self, key: AcceleratorKey) -> Option<&Accelerator> {
        self.accelerators.get(key)
    }

    fn find_accelerator(&self, event: &Event, phase: AcceleratorPhase) -> Option<AcceleratorKey> {
        self.accelerators
            .iter()
            .find(|(_, accelerator)| accelerator.matches_event(event, phase))
            .map(|(key, _)| key)
    }

    // ------------------------------------------------------------------
    // Event processing
    // ------------------------------------------------------------------

    pub fn process_event(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        event: &Event,
        match_phase: AcceleratorMatchPhase,
    ) {
        if event.is_key_event() {
            if event.event_type == EventType::KeyPressed
                && !event.is_char()
                && match_phase == AcceleratorMatchPhase::Any
            {
                let pre_target = self
                    .find_accelerator(event, AcceleratorPhase::PreTarget)
                    .and_then(|key| self.accelerators.get(key))
                    .map(|accelerator| accelerator.id());
                if let Some(id) = pre_target {
                    debug!("Key event matched pre-target accelerator {}", id);
                    delegate.on_accelerator(id, event, AcceleratorPhase::PreTarget);
                    return;
                }
            }
            self.process_key_event(tree, delegate, event);
            return;
        }
        self.process_pointer_event(tree, delegate, event);
    }

    fn process_key_event(&mut self, tree: &WindowTree, delegate: &mut dyn EventDispatcherDelegate, event: &Event) {
        let post_target = self.find_accelerator(event, AcceleratorPhase::PostTarget);
        let focused = delegate
            .focused_window_for_event_dispatcher()
            .filter(|&window| tree.contains_key(window));
        let target = self.modal_window_controller.target_for_window(tree, focused);

        if let Some(window) = target {
            // Key events are always for the client area.
            let client_id = delegate.event_target_client_id(tree, window, false);
            delegate.dispatch_input_event_to_window(window, client_id, event, post_target);
            return;
        }

        delegate.on_event_target_not_found(event);
        if let Some(id) = post_target.and_then(|key| self.accelerators.get(key)).map(|a| a.id()) {
            delegate.on_accelerator(id, event, AcceleratorPhase::PostTarget);
        }
    }

    fn process_pointer_event(&mut self, tree: &WindowTree, delegate: &mut dyn EventDispatcherDelegate, event: &Event) {
        let (Some(pointer_id), Some(root_location)) = (event.pointer_id(), event.root_location()) else {
            return;
        };
        let is_mouse_event = event.is_mouse_pointer_event();

        if is_mouse_event {
            self.mouse_pointer_last_location = root_location;
            delegate.on_mouse_cursor_location_changed(root_location);
        }

        // A mouse only goes up once its last button is released.
        let is_pointer_going_up = matches!(event.event_type, EventType::PointerUp | EventType::PointerCancelled)
            && (!is_mouse_event || event.flags.mouse_buttons_down() <= 1);

        if is_mouse_event {
            if event.event_type == EventType::PointerDown {
                self.mouse_button_down = true;
            } else if is_pointer_going_up {
                self.mouse_button_down = false;
            }
        }

        if let Some(capture) = self.capture_window {
            if is_mouse_event {
                self.mouse_cursor_source_window = Some(capture);
            }
            let client_id = self.capture_window_client_id;
            self.dispatch_to_client(tree, delegate, capture, client_id, event);
            if is_mouse_event {
                self.update_native_cursor(tree, delegate);
            }
            return;
        }

        let needs_target = self
            .pointer_targets
            .get(pointer_id)
            .is_none_or(|target| !target.is_pointer_down);
        if needs_target {
            let any_pointers_down = self.pointer_targets.any_pointers_down();
            self.update_target_for_pointer(tree, delegate, pointer_id, event);

            let target = self.pointer_targets.get(pointer_id).copied().unwrap_or_default();
            if is_mouse_event {
                self.mouse_cursor_source_window = target.window;
            }
            if target.is_pointer_down && !any_pointers_down {
                if let Some(window) = target.window {
                    delegate.set_focused_window_from_event_dispatcher(window);
                    delegate.set_native_capture(window);
                }
            }
        }

        // On release the cursor comes from the window under the mouse even
        // though the release itself goes to the window that had the press.
        if is_pointer_going_up && is_mouse_event {
            self.update_cursor_provider_by_last_known_location(tree, delegate);
        }

        if let Some(target) = self.pointer_targets.get(pointer_id).copied() {
            self.dispatch_to_pointer_target(tree, delegate, &target, event);
            // Only the mouse keeps a hover entry between events.
            if !is_mouse_event && !target.is_pointer_down {
                self.pointer_targets.stop_tracking(pointer_id);
            }
        }

        if is_pointer_going_up {
            if is_mouse_event {
                if let Some(target) = self.pointer_targets.get_mut(pointer_id) {
                    target.is_pointer_down = false;
                }
            } else {
                self.pointer_targets.stop_tracking(pointer_id);
            }
            if !self.pointer_targets.any_pointers_down() {
                delegate.release_native_capture();
            }
        }

        if is_mouse_event {
            self.update_native_cursor(tree, delegate);
        }
    }

    fn update_target_for_pointer(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        pointer_id: i32,
        event: &Event,
    ) {
        let new_target = self.pointer_target_for_event(tree, delegate, event);
        let Some(existing) = self.pointer_targets.get(pointer_id).copied() else {
            self.pointer_targets.start_tracking(pointer_id, new_target);
            return;
        };

        if new_target.window == existing.window && new_target.in_nonclient_area == existing.in_nonclient_area {
            // Down going to up is handled by process_pointer_event().
            if new_target.is_pointer_down {
                if let Some(target) = self.pointer_targets.get_mut(pointer_id) {
                    target.is_pointer_down = true;
                }
            }
            return;
        }

        if event.is_mouse_pointer_event() && existing.window.is_some() && existing.window != new_target.window {
            trace!("Mouse left its previous hover target, sending exit");
            let exit = Event::pointer_exited_from(event);
            self.dispatch_to_pointer_target(tree, delegate, &existing, &exit);
        }

        self.pointer_targets.stop_tracking(pointer_id);
        self.pointer_targets.start_tracking(pointer_id, new_target);
    }

    fn pointer_target_for_event(
        &self,
        tree: &WindowTree,
        delegate: &dyn EventDispatcherDelegate,
        event: &Event,
    ) -> PointerTarget {
        let location = event.root_location().unwrap_or_default();
        self.pointer_target_for_location(
            tree,
            delegate,
            location,
            event.is_mouse_pointer_event(),
            event.event_type == EventType::PointerDown,
        )
    }

    fn pointer_target_for_location(
        &self,
        tree: &WindowTree,
        delegate: &dyn EventDispatcherDelegate,
        screen_location: Point,
        is_mouse_event: bool,
        is_pointer_down: bool,
    ) -> PointerTarget {
        let (hit_window, local) = match self.find_deepest_visible_window_for_events(tree, delegate, screen_location) {
            Some((window, local)) => (Some(window), local),
            None => (None, screen_location),
        };
        let window = self.modal_window_controller.target_for_window(tree, hit_window);
        let in_nonclient_area = hit_window != window
            || hit_window
                .and_then(|key| tree.get(key))
                .is_some_and(|hit| hit.is_location_in_non_client_area(local));
        PointerTarget { window, is_mouse_event, in_nonclient_area, is_pointer_down }
    }

    fn find_deepest_visible_window_for_events(
        &self,
        tree: &WindowTree,
        delegate: &dyn EventDispatcherDelegate,
        screen_location: Point,
    ) -> Option<(WindowKey, Point)> {
        let root = delegate.root_window_containing(screen_location)?;
        tree.deepest_visible_window(root, screen_location)
    }

    fn dispatch_to_pointer_target(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        target: &PointerTarget,
        event: &Event,
    ) {
        let Some(window) = target.window.filter(|&window| tree.contains_key(window)) else {
            delegate.on_event_target_not_found(event);
            return;
        };
        if target.is_mouse_event {
            self.mouse_cursor_in_non_client_area = target.in_nonclient_area;
        }
        let client_id = delegate.event_target_client_id(tree, window, target.in_nonclient_area);
        self.dispatch_to_client(tree, delegate, window, client_id, event);
    }

    fn dispatch_to_client(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        window: WindowKey,
        client_id: ClientId,
        event: &Event,
    ) {
        let mut local_event = event.clone();
        if let Some(root_location) = event.root_location() {
            local_event.set_location(tree.to_window_location(window, root_location));
        }
        delegate.dispatch_input_event_to_window(window, client_id, &local_event, None);
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    /// Give `window` explicit capture on behalf of `client_id`, or release
    /// capture with `None`. Windows blocked by a modal window cannot capture.
    pub fn set_capture_window(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        window: Option<WindowKey>,
        client_id: ClientId,
    ) -> WsResult<()> {
        let client_id = if window.is_some() { client_id } else { ClientId::INVALID };
        if window == self.capture_window && client_id == self.capture_window_client_id {
            return Ok(());
        }
        if let Some(window) = window {
            let id = tree.id_of(window).ok_or(WsError::WindowNotFound)?;
            if self.modal_window_controller.is_window_blocked(tree, window) {
                debug!("Window {} cannot take capture: blocked by a modal window", id);
                return Err(WsError::BlockedByModal(id));
            }
        }
        self.change_capture(tree, delegate, window, client_id);
        Ok(())
    }

    fn change_capture(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        window: Option<WindowKey>,
        client_id: ClientId,
    ) {
        if let Some(old) = self.capture_window {
            delegate.on_capture_lost(old, self.capture_window_client_id);
        } else {
            // Explicit capture ends every implicit capture held by pointers.
            for (pointer_id, target) in self.pointer_targets.take_all() {
                if target.window.is_none() || target.window == window {
                    continue;
                }
                let (event_type, kind, location) = if target.is_mouse_event {
                    (EventType::PointerExited, PointerKind::Mouse, self.mouse_pointer_last_location)
                } else {
                    (EventType::PointerCancelled, PointerKind::Touch, Point::default())
                };
                let event = Event::pointer(event_type, kind, pointer_id, location, EventFlags::empty());
                self.dispatch_to_pointer_target(tree, delegate, &target, &event);
            }
        }

        let had_capture_window = self.capture_window.is_some();
        self.capture_window = window;
        self.capture_window_client_id = client_id;

        match window {
            Some(window) => {
                debug!("Capture set to {:?} for client {}", tree.id_of(window), client_id);
                if !had_capture_window {
                    delegate.set_native_capture(window);
                }
            }
            None => {
                debug!("Capture released");
                delegate.release_native_capture();
                self.update_cursor_provider_by_last_known_location(tree, delegate);
            }
        }
    }

    pub fn release_capture(&mut self, tree: &WindowTree, delegate: &mut dyn EventDispatcherDelegate) {
        if self.capture_window.is_some() {
            self.change_capture(tree, delegate, None, ClientId::INVALID);
        }
    }

    /// Release capture if `modal_window` blocks the capture window
    pub fn release_capture_blocked_by_modal_window(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        modal_window: WindowKey,
    ) {
        let Some(capture) = self.capture_window else {
            return;
        };
        if self.modal_window_controller.is_window_blocked_by(tree, capture, modal_window) {
            debug!("Releasing capture blocked by modal window {:?}", tree.id_of(modal_window));
            self.change_capture(tree, delegate, None, ClientId::INVALID);
        }
    }

    pub fn release_capture_blocked_by_any_modal_window(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
    ) {
        let Some(capture) = self.capture_window else {
            return;
        };
        if self.modal_window_controller.is_window_blocked(tree, capture) {
            debug!("Releasing capture blocked by a modal window");
            self.change_capture(tree, delegate, None, ClientId::INVALID);
        }
    }

    // ------------------------------------------------------------------
    // Modality and window lifecycle
    // ------------------------------------------------------------------

    /// Register an already modal window as system modal and release any
    /// capture it blocks
    pub fn add_system_modal_window(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        window: WindowKey,
    ) -> WsResult<()> {
        self.modal_window_controller.add_system_modal_window(tree, window)?;
        self.release_capture_blocked_by_modal_window(tree, delegate, window);
        Ok(())
    }

    /// Called after any hierarchy, visibility or modality change
    pub fn on_tree_changed(&mut self, tree: &WindowTree, delegate: &mut dyn EventDispatcherDelegate) {
        for modal in self.modal_window_controller.update_drawn_states(tree) {
            self.release_capture_blocked_by_modal_window(tree, delegate, modal);
        }
        self.release_capture_blocked_by_any_modal_window(tree, delegate);

        if let Some(capture) = self.capture_window {
            if !tree.is_drawn(capture) {
                self.cancel_pointer_events_to_target(tree, delegate, capture);
            }
        }
        let undrawn: Vec<WindowKey> = self
            .pointer_targets
            .iter()
            .filter_map(|(_, target)| target.window)
            .filter(|&window| !tree.is_drawn(window))
            .collect();
        for window in undrawn {
            self.pointer_targets.forget_window(window);
        }

        if !self.mouse_button_down {
            self.update_cursor_provider_by_last_known_location(tree, delegate);
        }
    }

    /// Called for each window being destroyed, before it leaves the tree
    pub fn on_window_destroyed(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        window: WindowKey,
    ) {
        self.modal_window_controller.on_window_destroyed(window);
        self.cancel_pointer_events_to_target(tree, delegate, window);
        if self.mouse_cursor_source_window == Some(window) {
            self.mouse_cursor_source_window = None;
        }
    }

    fn cancel_pointer_events_to_target(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        window: WindowKey,
    ) {
        if self.capture_window == Some(window) {
            let client_id = self.capture_window_client_id;
            self.capture_window = None;
            self.capture_window_client_id = ClientId::INVALID;
            self.mouse_button_down = false;
            delegate.on_capture_lost(window, client_id);
            delegate.release_native_capture();
            self.update_cursor_provider_by_last_known_location(tree, delegate);
            return;
        }
        if self.pointer_targets.forget_window(window) {
            debug!("Pointer targets lost window {:?}", tree.id_of(window));
        }
    }

    /// Drop capture and every pointer target without sending events
    pub fn reset(&mut self, tree: &WindowTree, delegate: &mut dyn EventDispatcherDelegate) {
        if let Some(capture) = self.capture_window {
            self.cancel_pointer_events_to_target(tree, delegate, capture);
        } else if self.pointer_targets.any_pointers_down() {
            delegate.release_native_capture();
        }
        self.pointer_targets.clear();
        self.mouse_button_down = false;
        self.mouse_cursor_source_window = None;
    }

    // ------------------------------------------------------------------
    // Cursor
    // ------------------------------------------------------------------

    /// Move the remembered mouse location, e.g. when a session is activated
    pub fn set_mouse_pointer_screen_location(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
        screen_location: Point,
    ) {
        self.mouse_pointer_last_location = screen_location;
        self.update_cursor_provider_by_last_known_location(tree, delegate);
    }

    /// Cursor of the window the mouse is over (or captured by)
    pub fn current_mouse_cursor(&self, tree: &WindowTree) -> CursorId {
        let Some(window) = self.mouse_cursor_source_window.and_then(|key| tree.get(key)) else {
            return CursorId::POINTER;
        };
        if self.mouse_cursor_in_non_client_area {
            window.non_client_cursor()
        } else {
            window.cursor()
        }
    }

    fn update_cursor_provider_by_last_known_location(
        &mut self,
        tree: &WindowTree,
        delegate: &mut dyn EventDispatcherDelegate,
    ) {
        if self.mouse_button_down {
            return;
        }
        let target = self.pointer_target_for_location(tree, delegate, self.mouse_pointer_last_location, true, false);
        self.mouse_cursor_source_window = target.window;
        self.mouse_cursor_in_non_client_area = target.in_nonclient_area;
        self.update_native_cursor(tree, delegate);
    }

    fn update_native_cursor(&mut self, tree: &WindowTree, delegate: &mut dyn EventDispatcherDelegate) {
        let cursor = self.current_mouse_cursor(tree);
        if self.last_cursor != Some(cursor) {
            self.last_cursor = Some(cursor);
            delegate.update_native_cursor(cursor);
        }
    }
}
