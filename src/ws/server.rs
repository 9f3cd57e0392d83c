//! Window Server
//!
//! Owns the window tree, the displays, one `WindowManagerState` per user and
//! the two platform seams. Every entry point of the dispatch core is a method
//! here; hierarchy changes made through it are forwarded to each session so
//! capture, pointer targets and modal bookkeeping stay in sync.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{WsError, WsResult};
use crate::ipc::ClientReply;
use crate::shared::{Geometry, Insets};
use crate::ws::accelerator::{AcceleratorKey, EventMatcher};
use crate::ws::display::DisplayManager;
use crate::ws::event::{Event, EventResult};
use crate::ws::ids::{ClientId, CursorId, DisplayId, UserId, WindowId};
use crate::ws::platform::{ClientTransport, PlatformDisplay};
use crate::ws::window::WindowKey;
use crate::ws::window_manager_state::{DispatchEnv, WindowManagerState};
use crate::ws::window_tree::WindowTree;

/// Window server
pub struct WindowServer<T: ClientTransport, P: PlatformDisplay> {
    tree: WindowTree,
    displays: DisplayManager,
    states: BTreeMap<UserId, WindowManagerState>,
    active_user: Option<UserId>,
    platform: P,
    transport: T,
    ack_delay: Option<Duration>,
    /// Local ids for server-owned windows
    next_server_window_id: u32,
}

impl<T: ClientTransport, P: PlatformDisplay> WindowServer<T, P> {
    /// Create a new window server. `ack_delay` of `None` waits for acks forever.
    pub fn new(platform: P, transport: T, ack_delay: Option<Duration>) -> Self {
        Self {
            tree: WindowTree::new(),
            displays: DisplayManager::new(),
            states: BTreeMap::new(),
            active_user: None,
            platform,
            transport,
            ack_delay,
            next_server_window_id: 0,
        }
    }

    pub fn tree(&self) -> &WindowTree {
        &self.tree
    }

    pub fn displays(&self) -> &DisplayManager {
        &self.displays
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn active_user(&self) -> Option<&UserId> {
        self.active_user.as_ref()
    }

    pub fn state(&self, user: &UserId) -> Option<&WindowManagerState> {
        self.states.get(user)
    }

    /// Sessions and the environment they borrow, split for disjoint access
    fn split(&mut self) -> (&mut BTreeMap<UserId, WindowManagerState>, DispatchEnv<'_>) {
        let env = DispatchEnv {
            now: Instant::now(),
            tree: &self.tree,
            displays: &mut self.displays,
            platform: &mut self.platform,
            transport: &mut self.transport,
        };
        (&mut self.states, env)
    }

    fn next_server_window_id(&mut self) -> WindowId {
        self.next_server_window_id += 1;
        WindowId::new(ClientId::SERVER, self.next_server_window_id)
    }

    // ------------------------------------------------------------------
    // Displays and users
    // ------------------------------------------------------------------

    /// Add a display with the given screen bounds. Existing users get a
    /// window manager root on it.
    pub fn add_display(&mut self, bounds: Geometry) -> WsResult<DisplayId> {
        let root_id = self.next_server_window_id();
        let root = self.tree.create_display_root(root_id, bounds)?;
        let display_id = self.displays.add_display(root, bounds);
        info!("Display {:?} added at {:?}", display_id, bounds);

        let users: Vec<(UserId, ClientId)> = self
            .states
            .iter()
            .map(|(user, state)| (user.clone(), state.wm_client()))
            .collect();
        for (user, wm_client) in users {
            self.create_wm_root(display_id, &user, wm_client)?;
        }
        self.notify_tree_changed();
        Ok(display_id)
    }

    fn create_wm_root(&mut self, display_id: DisplayId, user: &UserId, wm_client: ClientId) -> WsResult<WindowKey> {
        let Some((root, bounds)) = self.displays.display(display_id).map(|d| (d.root(), d.bounds())) else {
            return Err(WsError::WindowNotFound);
        };
        let id = self.next_server_window_id();
        let wm_root = self.tree.create_window(id, Geometry::new(0, 0, bounds.width, bounds.height))?;
        self.tree.add_child(root, wm_root)?;
        self.tree.set_embedded_client(wm_root, Some(wm_client))?;
        self.tree.set_visible(wm_root, self.active_user.as_ref() == Some(user))?;
        self.displays.set_wm_root(display_id, user.clone(), wm_root);
        debug!("Window manager root {} created for {} on {:?}", id, user, display_id);
        Ok(wm_root)
    }

    /// Start a session for `user` whose window manager is `wm_client`. The
    /// first user becomes active.
    pub fn add_user(&mut self, user: UserId, wm_client: ClientId) -> WsResult<()> {
        if self.states.contains_key(&user) {
            return Err(WsError::DuplicateUser(user));
        }
        self.displays.add_user(user.clone());
        self.states
            .insert(user.clone(), WindowManagerState::new(user.clone(), wm_client, self.ack_delay));

        let displays: Vec<DisplayId> = self.displays.displays().map(|display| display.id()).collect();
        for display in displays {
            self.create_wm_root(display, &user, wm_client)?;
        }
        info!("User {} added with window manager client {}", user, wm_client);

        if self.active_user.is_none() {
            self.set_active_user(&user)?;
        }
        Ok(())
    }

    /// Switch input to `user`'s session. Its roots become visible, the
    /// previous session's are hidden and the mouse position carries over.
    pub fn set_active_user(&mut self, user: &UserId) -> WsResult<()> {
        if !self.states.contains_key(user) {
            return Err(WsError::UnknownUser(user.clone()));
        }
        if self.active_user.as_ref() == Some(user) {
            return Ok(());
        }

        let previous = self.active_user.replace(user.clone());
        let mouse_location = match &previous {
            Some(previous) => self.displays.cursor_location(previous),
            None => self.displays.cursor_location(user),
        };

        if let Some(previous) = &previous {
            for root in self.displays.wm_roots_for_user(previous) {
                self.tree.set_visible(root, false)?;
            }
        }
        for root in self.displays.wm_roots_for_user(user) {
            self.tree.set_visible(root, true)?;
        }

        let (states, mut env) = self.split();
        if let Some(state) = previous.as_ref().and_then(|previous| states.get_mut(previous)) {
            state.deactivate(&mut env);
        }
        for state in states.values_mut() {
            state.on_tree_changed(&mut env);
        }
        if let Some(state) = states.get_mut(user) {
            state.activate(&mut env, mouse_location);
        }
        info!("Active user is now {}", user);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Input and acks
    // ------------------------------------------------------------------

    /// Entry point for platform input
    pub fn process_event(&mut self, event: Event) {
        let Some(user) = self.active_user.clone() else {
            debug!("Dropping {:?}: no active user", event.event_type);
            return;
        };
        let (states, mut env) = self.split();
        if let Some(state) = states.get_mut(&user) {
            state.process_event(&mut env, event);
        }
    }

    pub fn on_event_ack(&mut self, client_id: ClientId, result: EventResult) {
        let (states, mut env) = self.split();
        for state in states.values_mut() {
            state.on_event_ack(&mut env, client_id, result);
        }
    }

    pub fn on_accelerator_ack(&mut self, client_id: ClientId, result: EventResult) {
        let (states, mut env) = self.split();
        for state in states.values_mut() {
            state.on_accelerator_ack(&mut env, client_id, result);
        }
    }

    /// Route a wire reply to the session waiting on that exact id. Replies
    /// naming an id nobody waits on are stale and dropped.
    pub fn handle_client_reply(&mut self, client_id: ClientId, reply: ClientReply) {
        let (id, result) = match reply {
            ClientReply::EventAck { event_id, result } => (event_id, result),
            ClientReply::AcceleratorAck { ack_id, result } => (ack_id, result),
        };
        let (states, mut env) = self.split();
        let waiting = states.values_mut().find(|state| {
            state.awaited_client() == Some(client_id) && state.in_flight_event_id() == Some(id)
        });
        let Some(state) = waiting else {
            debug!("Dropping stale reply {:?} from client {}", reply, client_id);
            return;
        };
        match reply {
            ClientReply::EventAck { .. } => state.on_event_ack(&mut env, client_id, result),
            ClientReply::AcceleratorAck { .. } => state.on_accelerator_ack(&mut env, client_id, result),
        }
    }

    /// Fire every ack timer that expired by `now`. Returns how many fired.
    pub fn check_ack_timeouts(&mut self, now: Instant) -> usize {
        let (states, mut env) = self.split();
        let mut fired = 0;
        for state in states.values_mut() {
            if state.check_ack_timeout(&mut env, now) {
                fired += 1;
            }
        }
        fired
    }

    /// Earliest instant at which `check_ack_timeouts` has work to do
    pub fn next_ack_deadline(&self) -> Option<Instant> {
        self.states.values().filter_map(WindowManagerState::next_ack_deadline).min()
    }

    /// Forget `client_id`: its top-level windows are destroyed and anything
    /// it still owes an answer for completes.
    pub fn on_client_disconnected(&mut self, client_id: ClientId) {
        info!("Client {} disconnected", client_id);
        let (states, mut env) = self.split();
        for state in states.values_mut() {
            state.on_client_disconnected(&mut env, client_id);
        }

        let owned_roots: Vec<WindowKey> = self
            .tree
            .keys()
            .filter(|&key| {
                let owned = |key: WindowKey| self.tree.get(key).is_some_and(|w| w.owner() == client_id);
                owned(key) && self.tree.parent(key).is_none_or(|parent| !owned(parent))
            })
            .collect();
        for window in owned_roots {
            if let Err(err) = self.destroy_window(window) {
                debug!("Window of client {} already gone: {}", client_id, err);
            }
        }
    }

    // ------------------------------------------------------------------
    // Window hierarchy
    // ------------------------------------------------------------------

    pub fn create_window(&mut self, id: WindowId, bounds: Geometry) -> WsResult<WindowKey> {
        self.tree.create_window(id, bounds)
    }

    pub fn lookup(&self, id: WindowId) -> Option<WindowKey> {
        self.tree.lookup(id)
    }

    pub fn add_child(&mut self, parent: WindowKey, child: WindowKey) -> WsResult<()> {
        self.tree.add_child(parent, child)?;
        self.notify_tree_changed();
        Ok(())
    }

    pub fn set_visible(&mut self, window: WindowKey, visible: bool) -> WsResult<()> {
        self.tree.set_visible(window, visible)?;
        self.notify_tree_changed();
        Ok(())
    }

    pub fn set_bounds(&mut self, window: WindowKey, bounds: Geometry) -> WsResult<()> {
        self.tree.set_bounds(window, bounds)?;
        self.notify_tree_changed();
        Ok(())
    }

    pub fn set_transient_parent(&mut self, window: WindowKey, parent: Option<WindowKey>) -> WsResult<()> {
        self.tree.set_transient_parent(window, parent)?;
        self.notify_tree_changed();
        Ok(())
    }

    /// Make `window` modal. With a transient parent it is window modal;
    /// use `add_system_modal_window` to block everything.
    pub fn set_modal(&mut self, window: WindowKey) -> WsResult<()> {
        self.tree.set_modal(window)?;
        self.notify_tree_changed();
        Ok(())
    }

    pub fn set_client_area(&mut self, window: WindowKey, insets: Option<Insets>) -> WsResult<()> {
        self.tree.set_client_area(window, insets)
    }

    pub fn set_embedded_client(&mut self, window: WindowKey, client: Option<ClientId>) -> WsResult<()> {
        self.tree.set_embedded_client(window, client)
    }

    pub fn set_cursor(&mut self, window: WindowKey, cursor: CursorId, non_client_cursor: CursorId) -> WsResult<()> {
        self.tree.set_cursor(window, cursor, non_client_cursor)?;
        self.notify_tree_changed();
        Ok(())
    }

    /// Destroy `window` and its descendants
    pub fn destroy_window(&mut self, window: WindowKey) -> WsResult<()> {
        if !self.tree.contains_key(window) {
            return Err(WsError::WindowNotFound);
        }
        let doomed = self.tree.subtree(window);
        {
            let (states, mut env) = self.split();
            for state in states.values_mut() {
                for &key in &doomed {
                    state.on_window_destroyed(&mut env, key);
                }
            }
        }
        self.tree.destroy(window)?;
        self.notify_tree_changed();
        Ok(())
    }

    fn notify_tree_changed(&mut self) {
        let (states, mut env) = self.split();
        for state in states.values_mut() {
            state.on_tree_changed(&mut env);
        }
    }

    // ------------------------------------------------------------------
    // Per-session policy
    // ------------------------------------------------------------------

    /// Session whose window manager roots contain `window`, else the active one
    fn user_for_window(&self, window: WindowKey) -> Option<UserId> {
        self.displays
            .displays()
            .flat_map(|display| display.wm_roots())
            .find(|&(_, root)| self.tree.contains(root, window))
            .map(|(user, _)| user.clone())
            .or_else(|| self.active_user.clone())
    }

    fn state_mut(&mut self, user: &UserId) -> WsResult<&mut WindowManagerState> {
        self.states.get_mut(user).ok_or_else(|| WsError::UnknownUser(user.clone()))
    }

    /// Give `window` explicit capture for `client_id`, or release capture
    /// in the active session with `None`
    pub fn set_capture_window(&mut self, window: Option<WindowKey>, client_id: ClientId) -> WsResult<()> {
        let user = match window {
            Some(window) => self.user_for_window(window),
            None => self.active_user.clone(),
        };
        let user = user.ok_or(WsError::WindowNotFound)?;
        let (states, mut env) = self.split();
        let state = states.get_mut(&user).ok_or_else(|| WsError::UnknownUser(user.clone()))?;
        state.set_capture_window(&mut env, window, client_id)
    }

    /// Make `window` system modal for the session it belongs to
    pub fn add_system_modal_window(&mut self, window: WindowKey) -> WsResult<()> {
        let user = self.user_for_window(window).ok_or(WsError::WindowNotFound)?;
        if !self.states.contains_key(&user) {
            return Err(WsError::UnknownUser(user));
        }
        self.tree.set_modal(window)?;
        let (states, mut env) = self.split();
        if let Some(state) = states.get_mut(&user) {
            state.add_system_modal_window(&mut env, window)?;
        }
        self.notify_tree_changed();
        Ok(())
    }

    pub fn add_accelerator(&mut self, user: &UserId, id: u32, matcher: EventMatcher) -> WsResult<AcceleratorKey> {
        self.state_mut(user)?.add_accelerator(id, matcher)
    }

    pub fn remove_accelerator(&mut self, user: &UserId, id: u32) -> WsResult<bool> {
        Ok(self.state_mut(user)?.remove_accelerator(id))
    }

    pub fn set_focused_window(&mut self, window: Option<WindowKey>) -> WsResult<()> {
        let user = match window {
            Some(window) if !self.tree.contains_key(window) => return Err(WsError::WindowNotFound),
            Some(window) => self.user_for_window(window),
            None => self.active_user.clone(),
        };
        let user = user.ok_or(WsError::WindowNotFound)?;
        self.state_mut(&user)?.set_focused_window(window);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::ClientMessage;
    use crate::shared::Point;
    use crate::ws::event::{EventFlags, EventType, KeyCode};
    use crate::ws::test_support::{RecordingPlatform, RecordingTransport};
    use crate::ws::window_manager_state::EventDispatchPhase;

    const WM: ClientId = ClientId(100);
    const APP: ClientId = ClientId(1);

    type TestServer = WindowServer<RecordingTransport, RecordingPlatform>;

    fn server() -> (TestServer, UserId) {
        let mut server = WindowServer::new(
            RecordingPlatform::default(),
            RecordingTransport::default(),
            Some(Duration::from_secs(60)),
        );
        server.add_display(Geometry::new(0, 0, 1000, 1000)).unwrap();
        let alice = UserId::new("alice");
        server.add_user(alice.clone(), WM).unwrap();
        (server, alice)
    }

    fn app_window(server: &mut TestServer, user: &UserId, local_id: u32, bounds: Geometry) -> WindowKey {
        let wm_root = server.displays().wm_roots_for_user(user)[0];
        let key = server.create_window(WindowId::new(APP, local_id), bounds).unwrap();
        server.add_child(wm_root, key).unwrap();
        server.set_visible(key, true).unwrap();
        key
    }

    fn press(x: i32, y: i32) -> Event {
        Event::mouse(EventType::PointerDown, Point::new(x, y), EventFlags::LEFT_MOUSE_BUTTON)
    }

    #[test]
    fn test_first_user_becomes_active_with_visible_root() {
        let (server, alice) = server();
        assert_eq!(server.active_user(), Some(&alice));
        let roots = server.displays().wm_roots_for_user(&alice);
        assert_eq!(roots.len(), 1);
        assert!(server.tree().is_drawn(roots[0]));
        assert_eq!(server.tree().get(roots[0]).unwrap().embedded_client(), Some(WM));
    }

    #[test]
    fn test_duplicate_and_unknown_users() {
        let (mut server, alice) = server();
        assert_eq!(server.add_user(alice.clone(), WM), Err(WsError::DuplicateUser(alice)));
        let nobody = UserId::new("nobody");
        assert_eq!(server.set_active_user(&nobody), Err(WsError::UnknownUser(nobody)));
    }

    #[test]
    fn test_event_reaches_client_and_wire_reply_completes_it() {
        let (mut server, alice) = server();
        app_window(&mut server, &alice, 10, Geometry::new(0, 0, 100, 100));

        server.process_event(press(10, 10));
        assert_eq!(server.transport().input_events(), vec![(APP, 1, WindowId::new(APP, 10))]);

        // A reply naming the wrong id is stale.
        server.handle_client_reply(APP, ClientReply::EventAck { event_id: 9, result: EventResult::Handled });
        assert_eq!(server.state(&alice).unwrap().phase(), EventDispatchPhase::AwaitingTargetAck);

        server.handle_client_reply(APP, ClientReply::EventAck { event_id: 1, result: EventResult::Handled });
        assert_eq!(server.state(&alice).unwrap().phase(), EventDispatchPhase::Idle);
    }

    #[test]
    fn test_clicking_empty_root_goes_to_window_manager() {
        let (mut server, _) = server();
        server.process_event(press(500, 500));
        let events = server.transport().input_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, WM);
    }

    #[test]
    fn test_timeout_through_server() {
        let (mut server, alice) = server();
        app_window(&mut server, &alice, 10, Geometry::new(0, 0, 100, 100));
        server.process_event(press(10, 10));

        let deadline = server.next_ack_deadline().unwrap();
        assert_eq!(server.check_ack_timeouts(deadline - Duration::from_millis(1)), 0);
        assert_eq!(server.check_ack_timeouts(deadline), 1);
        assert_eq!(server.check_ack_timeouts(deadline), 0);
        assert!(server.next_ack_deadline().is_none());
        assert!(server
            .transport()
            .messages
            .contains(&(WM, ClientMessage::ClientJankinessChanged { client: APP, janky: true })));
    }

    #[test]
    fn test_system_modal_window_redirects_and_destroy_restores() {
        let (mut server, alice) = server();
        let b = app_window(&mut server, &alice, 10, Geometry::new(0, 0, 400, 400));
        let a = app_window(&mut server, &alice, 20, Geometry::new(500, 500, 100, 100));
        server.add_system_modal_window(a).unwrap();

        server.process_event(press(50, 50));
        assert_eq!(server.transport().input_events()[0].2, WindowId::new(APP, 20));
        server.on_event_ack(APP, EventResult::Handled);
        server.process_event(Event::mouse(EventType::PointerUp, Point::new(50, 50), EventFlags::LEFT_MOUSE_BUTTON));
        server.on_event_ack(APP, EventResult::Handled);

        server.destroy_window(a).unwrap();
        server.transport_mut().take();
        server.process_event(press(50, 50));
        let events = server.transport().input_events();
        assert_eq!(events.last().map(|event| event.2), server.tree().id_of(b));
    }

    #[test]
    fn test_destroying_capture_window_releases_capture() {
        let (mut server, alice) = server();
        let c = app_window(&mut server, &alice, 10, Geometry::new(0, 0, 100, 100));
        server.set_capture_window(Some(c), APP).unwrap();
        assert!(server.platform().captured);

        server.destroy_window(c).unwrap();
        assert!(server
            .transport()
            .messages
            .contains(&(APP, ClientMessage::CaptureLost { window: WindowId::new(APP, 10) })));
        let state = server.state(&alice).unwrap();
        assert_eq!(state.dispatcher().capture_window(), None);
        assert!(!server.platform().captured);
    }

    #[test]
    fn test_disconnect_destroys_client_windows() {
        let (mut server, alice) = server();
        let a = app_window(&mut server, &alice, 10, Geometry::new(0, 0, 100, 100));
        let child = server.create_window(WindowId::new(APP, 11), Geometry::new(0, 0, 10, 10)).unwrap();
        server.add_child(a, child).unwrap();
        server.process_event(press(10, 10));

        server.on_client_disconnected(APP);

        assert!(server.tree().get(a).is_none());
        assert!(server.tree().get(child).is_none());
        assert_eq!(server.state(&alice).unwrap().phase(), EventDispatchPhase::Idle);
    }

    #[test]
    fn test_switching_users_swaps_roots_and_carries_mouse() {
        let (mut server, alice) = server();
        let bob = UserId::new("bob");
        server.add_user(bob.clone(), ClientId(200)).unwrap();
        assert_eq!(server.active_user(), Some(&alice));
        let alice_root = server.displays().wm_roots_for_user(&alice)[0];
        let bob_root = server.displays().wm_roots_for_user(&bob)[0];
        assert!(!server.tree().is_drawn(bob_root));

        server.process_event(Event::mouse(EventType::PointerMoved, Point::new(300, 300), EventFlags::empty()));
        server.on_event_ack(WM, EventResult::Handled);
        server.set_active_user(&bob).unwrap();

        assert!(server.tree().is_drawn(bob_root));
        assert!(!server.tree().is_drawn(alice_root));
        let bob_state = server.state(&bob).unwrap();
        assert_eq!(bob_state.dispatcher().mouse_pointer_last_location(), Point::new(300, 300));

        server.transport_mut().take();
        server.process_event(Event::key(EventType::KeyPressed, KeyCode::A, EventFlags::empty()));
        server.process_event(press(10, 10));
        assert_eq!(server.transport().input_events()[0].0, ClientId(200));
    }

    #[test]
    fn test_accelerators_are_per_user() {
        let (mut server, alice) = server();
        let bob = UserId::new("bob");
        server.add_user(bob.clone(), ClientId(200)).unwrap();
        let matcher = EventMatcher::key_press(KeyCode::F4, EventFlags::ALT_DOWN);
        server.add_accelerator(&alice, 1, matcher).unwrap();
        server.add_accelerator(&bob, 1, matcher).unwrap();
        assert_eq!(server.add_accelerator(&alice, 1, matcher), Err(WsError::DuplicateAccelerator(1)));
        assert_eq!(server.remove_accelerator(&bob, 1), Ok(true));

        server.process_event(Event::key(EventType::KeyPressed, KeyCode::F4, EventFlags::ALT_DOWN));
        assert_eq!(server.transport().accelerators(), vec![(1, Some(1))]);
        server.handle_client_reply(WM, ClientReply::AcceleratorAck { ack_id: 1, result: EventResult::Handled });
        assert_eq!(server.state(&alice).unwrap().phase(), EventDispatchPhase::Idle);
    }
}
