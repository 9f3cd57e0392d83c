//! Window Manager State
//!
//! One per user session. Owns the session's `EventDispatcher`, acts as its
//! delegate and runs the acknowledgment protocol: at most one event is in
//! flight at a time, everything that arrives meanwhile is queued, and a
//! client that does not answer before the ack timer fires is marked janky and
//! treated as if it left the event unhandled.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::WsResult;
use crate::shared::Point;
use crate::ws::accelerator::{AcceleratorKey, AcceleratorPhase, EventMatcher};
use crate::ws::display::DisplayManager;
use crate::ws::event::{Event, EventResult};
use crate::ws::event_dispatcher::{AcceleratorMatchPhase, EventDispatcher, EventDispatcherDelegate};
use crate::ws::ids::{ClientId, CursorId, UserId};
use crate::ws::platform::{ClientTransport, PlatformDisplay};
use crate::ws::window::WindowKey;
use crate::ws::window_tree::WindowTree;

/// Everything a session borrows from the server while handling a call
pub struct DispatchEnv<'a> {
    /// When the current call started; ack timers run from here
    pub now: Instant,
    pub tree: &'a WindowTree,
    pub displays: &'a mut DisplayManager,
    pub platform: &'a mut dyn PlatformDisplay,
    pub transport: &'a mut dyn ClientTransport,
}

/// What the session is waiting for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventDispatchPhase {
    #[default]
    Idle,
    /// The window manager is deciding on a pre-target accelerator
    AwaitingPreTargetAccelerator,
    /// A client is handling an input event
    AwaitingTargetAck,
}

/// Target the dispatcher already resolved for a queued event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedEventTarget {
    pub window: WindowKey,
    pub client_id: ClientId,
    pub accelerator: Option<AcceleratorKey>,
}

#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: Event,
    /// Set when the event went through the dispatcher while another event
    /// was in flight
    pub processed_target: Option<ProcessedEventTarget>,
}

#[derive(Debug, Clone)]
struct InFlightEvent {
    event_id: u32,
    client_id: ClientId,
    event: Event,
}

/// One-shot timer measured against caller supplied instants
#[derive(Debug, Clone, Copy)]
struct AckTimer {
    started: Option<Instant>,
    /// `None` waits forever
    delay: Option<Duration>,
}

impl AckTimer {
    fn new(delay: Option<Duration>) -> Self {
        Self { started: None, delay }
    }

    fn start(&mut self, now: Instant) {
        self.started = Some(now);
    }

    fn stop(&mut self) {
        self.started = None;
    }

    fn deadline(&self) -> Option<Instant> {
        self.started?.checked_add(self.delay?)
    }

    fn has_expired(&self, now: Instant) -> bool {
        match (self.started, self.delay) {
            (Some(started), Some(delay)) => now.saturating_duration_since(started) >= delay,
            _ => false,
        }
    }
}

/// In-flight, queued and timing state of a session
#[derive(Debug)]
struct DispatchPipeline {
    phase: EventDispatchPhase,
    in_flight: Option<InFlightEvent>,
    post_target_accelerator: Option<AcceleratorKey>,
    event_queue: VecDeque<QueuedEvent>,
    /// Dispatches produced during one dispatcher call while an event was
    /// already in flight; moved to the front of the queue afterwards
    processed_backlog: Vec<QueuedEvent>,
    ack_timer: AckTimer,
    next_event_id: u32,
    janky_clients: HashSet<ClientId>,
}

impl DispatchPipeline {
    fn new(ack_delay: Option<Duration>) -> Self {
        Self {
            phase: EventDispatchPhase::Idle,
            in_flight: None,
            post_target_accelerator: None,
            event_queue: VecDeque::new(),
            processed_backlog: Vec::new(),
            ack_timer: AckTimer::new(ack_delay),
            next_event_id: 0,
            janky_clients: HashSet::new(),
        }
    }

    fn is_waiting(&self) -> bool {
        self.phase != EventDispatchPhase::Idle
    }

    fn awaited_client(&self) -> Option<ClientId> {
        self.in_flight.as_ref().map(|in_flight| in_flight.client_id)
    }

    fn allocate_event_id(&mut self) -> u32 {
        self.next_event_id = self.next_event_id.wrapping_add(1).max(1);
        self.next_event_id
    }

    fn begin(&mut self, phase: EventDispatchPhase, client_id: ClientId, event: &Event, now: Instant) -> u32 {
        let event_id = self.allocate_event_id();
        self.phase = phase;
        self.in_flight = Some(InFlightEvent { event_id, client_id, event: event.clone() });
        self.ack_timer.start(now);
        event_id
    }

    /// Back to idle, handing out what was in flight
    fn finish(&mut self) -> Option<(EventDispatchPhase, InFlightEvent, Option<AcceleratorKey>)> {
        let phase = std::mem::take(&mut self.phase);
        self.ack_timer.stop();
        let accelerator = self.post_target_accelerator.take();
        self.in_flight.take().map(|in_flight| (phase, in_flight, accelerator))
    }

    /// Queue a raw event, replacing the newest queued move of the same pointer
    fn queue_event(&mut self, event: Event) {
        if let Some(last) = self.event_queue.back_mut() {
            if last.processed_target.is_none() && last.event.can_coalesce_with(&event) {
                trace!("Coalescing queued {:?}", event.event_type);
                last.event = event;
                return;
            }
        }
        self.event_queue.push_back(QueuedEvent { event, processed_target: None });
    }

    fn flush_backlog(&mut self) {
        for queued in self.processed_backlog.drain(..).rev() {
            self.event_queue.push_front(queued);
        }
    }

    /// Hand a resolved event to its client and start waiting for the ack
    fn dispatch_to_client(
        &mut self,
        env: &mut DispatchEnv<'_>,
        window: WindowKey,
        client_id: ClientId,
        event: &Event,
        accelerator: Option<AcceleratorKey>,
    ) {
        let Some(window_id) = env.tree.id_of(window) else {
            debug!("Dropping {:?}: target window is gone", event.event_type);
            return;
        };
        if !client_id.is_valid() || client_id == ClientId::SERVER {
            debug!("Dropping {:?} for window {}: no client to receive it", event.event_type, window_id);
            return;
        }
        let event_id = self.begin(EventDispatchPhase::AwaitingTargetAck, client_id, event, env.now);
        self.post_target_accelerator = accelerator;
        debug!(
            "Dispatching {:?} (event {}) to client {} window {}",
            event.event_type, event_id, client_id, window_id
        );
        env.transport.dispatch_input_event(client_id, event_id, window_id, event);
    }
}

/// Delegate handed to the dispatcher for the duration of one call
struct SessionDelegate<'s, 'e> {
    user_id: &'s UserId,
    wm_client: ClientId,
    /// Only the active session drives the native display
    active: bool,
    focused_window: &'s mut Option<WindowKey>,
    pipeline: &'s mut DispatchPipeline,
    env: &'s mut DispatchEnv<'e>,
}

impl EventDispatcherDelegate for SessionDelegate<'_, '_> {
    fn on_accelerator(&mut self, accelerator_id: u32, event: &Event, phase: AcceleratorPhase) {
        match phase {
            AcceleratorPhase::PreTarget => {
                let ack_id = self.pipeline.begin(
                    EventDispatchPhase::AwaitingPreTargetAccelerator,
                    self.wm_client,
                    event,
                    self.env.now,
                );
                debug!("Pre-target accelerator {} sent to window manager (ack {})", accelerator_id, ack_id);
                self.env
                    .transport
                    .dispatch_accelerator(self.wm_client, accelerator_id, event, Some(ack_id));
            }
            AcceleratorPhase::PostTarget => {
                debug!("Post-target accelerator {} sent to window manager", accelerator_id);
                self.env
                    .transport
                    .dispatch_accelerator(self.wm_client, accelerator_id, event, None);
            }
        }
    }

    fn set_focused_window_from_event_dispatcher(&mut self, window: WindowKey) {
        if *self.focused_window != Some(window) {
            debug!("Focus moved to {:?}", self.env.tree.id_of(window));
            *self.focused_window = Some(window);
        }
    }

    fn focused_window_for_event_dispatcher(&self) -> Option<WindowKey> {
        *self.focused_window
    }

    fn set_native_capture(&mut self, _window: WindowKey) {
        if self.active {
            self.env.platform.set_capture();
        }
    }

    fn release_native_capture(&mut self) {
        if self.active {
            self.env.platform.release_capture();
        }
    }

    fn on_capture_lost(&mut self, window: WindowKey, client_id: ClientId) {
        match self.env.tree.id_of(window) {
            Some(window_id) if client_id.is_valid() => self.env.transport.capture_lost(client_id, window_id),
            _ => debug!("Capture lost by a window that no longer exists"),
        }
    }

    fn on_mouse_cursor_location_changed(&mut self, screen_location: Point) {
        self.env
            .displays
            .user_display_manager_mut(self.user_id)
            .on_mouse_cursor_location_changed(screen_location);
    }

    fn update_native_cursor(&mut self, cursor: CursorId) {
        if self.active {
            self.env.platform.update_cursor(cursor);
        }
    }

    fn dispatch_input_event_to_window(
        &mut self,
        target: WindowKey,
        client_id: ClientId,
        event: &Event,
        accelerator: Option<AcceleratorKey>,
    ) {
        if self.pipeline.is_waiting() {
            self.pipeline.processed_backlog.push(QueuedEvent {
                event: event.clone(),
                processed_target: Some(ProcessedEventTarget { window: target, client_id, accelerator }),
            });
            return;
        }
        self.pipeline.dispatch_to_client(self.env, target, client_id, event, accelerator);
    }

    fn root_window_containing(&self, screen_location: Point) -> Option<WindowKey> {
        self.env
            .displays
            .display_containing(screen_location)?
            .wm_root(self.user_id)
    }

    fn on_event_target_not_found(&mut self, event: &Event) {
        debug!("No target for {:?}", event.event_type);
    }
}

/// Window manager state
#[derive(Debug)]
pub struct WindowManagerState {
    user_id: UserId,
    wm_client: ClientId,
    active: bool,
    focused_window: Option<WindowKey>,
    dispatcher: EventDispatcher,
    pipeline: DispatchPipeline,
}

impl WindowManagerState {
    /// Create the state for `user_id`'s session. `ack_delay` of `None`
    /// waits for acks forever.
    pub fn new(user_id: UserId, wm_client: ClientId, ack_delay: Option<Duration>) -> Self {
        Self {
            user_id,
            wm_client,
            active: false,
            focused_window: None,
            dispatcher: EventDispatcher::new(),
            pipeline: DispatchPipeline::new(ack_delay),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn wm_client(&self) -> ClientId {
        self.wm_client
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn phase(&self) -> EventDispatchPhase {
        self.pipeline.phase
    }

    pub fn focused_window(&self) -> Option<WindowKey> {
        self.focused_window
    }

    /// Client the in-flight event or accelerator is waiting on
    pub fn awaited_client(&self) -> Option<ClientId> {
        self.pipeline.awaited_client()
    }

    /// Id of the in-flight event or pre-target accelerator ack
    pub fn in_flight_event_id(&self) -> Option<u32> {
        self.pipeline.in_flight.as_ref().map(|in_flight| in_flight.event_id)
    }

    pub fn queued_event_count(&self) -> usize {
        self.pipeline.event_queue.len()
    }

    pub fn is_client_janky(&self, client_id: ClientId) -> bool {
        self.pipeline.janky_clients.contains(&client_id)
    }

    /// When the in-flight event times out, if it can
    pub fn next_ack_deadline(&self) -> Option<Instant> {
        self.pipeline.ack_timer.deadline()
    }

    /// Run `f` against the dispatcher with this session as its delegate
    fn with_dispatcher<R>(
        &mut self,
        env: &mut DispatchEnv<'_>,
        f: impl FnOnce(&mut EventDispatcher, &WindowTree, &mut dyn EventDispatcherDelegate) -> R,
    ) -> R {
        let tree = env.tree;
        let result = {
            let mut delegate = SessionDelegate {
                user_id: &self.user_id,
                wm_client: self.wm_client,
                active: self.active,
                focused_window: &mut self.focused_window,
                pipeline: &mut self.pipeline,
                env,
            };
            f(&mut self.dispatcher, tree, &mut delegate)
        };
        self.pipeline.flush_backlog();
        result
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    pub fn process_event(&mut self, env: &mut DispatchEnv<'_>, event: Event) {
        if self.pipeline.is_waiting() {
            self.pipeline.queue_event(event);
            return;
        }
        self.with_dispatcher(env, |dispatcher, tree, delegate| {
            dispatcher.process_event(tree, delegate, &event, AcceleratorMatchPhase::Any)
        });
        self.process_next_event_from_queue(env);
    }

    /// A client answered an input event
    pub fn on_event_ack(&mut self, env: &mut DispatchEnv<'_>, client_id: ClientId, result: EventResult) {
        if self.pipeline.phase != EventDispatchPhase::AwaitingTargetAck
            || self.pipeline.awaited_client() != Some(client_id)
        {
            debug!("Ignoring event ack from client {}: not awaited", client_id);
            return;
        }
        self.clear_jankiness(env, client_id);
        self.complete_in_flight(env, result);
    }

    /// The window manager answered a pre-target accelerator
    pub fn on_accelerator_ack(&mut self, env: &mut DispatchEnv<'_>, client_id: ClientId, result: EventResult) {
        if self.pipeline.phase != EventDispatchPhase::AwaitingPreTargetAccelerator || client_id != self.wm_client {
            debug!("Ignoring accelerator ack from client {}: not awaited", client_id);
            return;
        }
        self.clear_jankiness(env, client_id);
        self.complete_in_flight(env, result);
    }

    /// Fire the ack timer if it expired by `now`. Returns true if it did.
    pub fn check_ack_timeout(&mut self, env: &mut DispatchEnv<'_>, now: Instant) -> bool {
        env.now = now;
        if !self.pipeline.is_waiting() || !self.pipeline.ack_timer.has_expired(now) {
            return false;
        }
        let Some(client_id) = self.pipeline.awaited_client() else {
            return false;
        };
        warn!(
            "Client {} did not answer event {:?} in time",
            client_id,
            self.in_flight_event_id()
        );
        if self.pipeline.janky_clients.insert(client_id) {
            info!("Client {} is now janky", client_id);
            env.transport.client_jankiness_changed(self.wm_client, client_id, true);
        }
        self.complete_in_flight(env, EventResult::Unhandled);
        true
    }

    /// Forget `client_id`. An event it still owes an answer for completes
    /// as unhandled, or handled if the window manager itself went away.
    pub fn on_client_disconnected(&mut self, env: &mut DispatchEnv<'_>, client_id: ClientId) {
        self.pipeline.janky_clients.remove(&client_id);
        self.pipeline.event_queue.retain(|queued| {
            queued
                .processed_target
                .is_none_or(|target| target.client_id != client_id)
        });
        if self.dispatcher.capture_window_client_id() == client_id {
            self.with_dispatcher(env, |dispatcher, tree, delegate| dispatcher.release_capture(tree, delegate));
        }
        if self.pipeline.awaited_client() == Some(client_id) {
            let result = if client_id == self.wm_client {
                EventResult::Handled
            } else {
                EventResult::Unhandled
            };
            debug!("Client {} disconnected while awaited, completing as {:?}", client_id, result);
            self.complete_in_flight(env, result);
        }
    }

    fn clear_jankiness(&mut self, env: &mut DispatchEnv<'_>, client_id: ClientId) {
        if self.pipeline.janky_clients.remove(&client_id) {
            info!("Client {} is responsive again", client_id);
            env.transport.client_jankiness_changed(self.wm_client, client_id, false);
        }
    }

    fn complete_in_flight(&mut self, env: &mut DispatchEnv<'_>, result: EventResult) {
        let Some((phase, in_flight, accelerator)) = self.pipeline.finish() else {
            return;
        };
        debug!("Event {} completed as {:?}", in_flight.event_id, result);

        if result == EventResult::Unhandled {
            match phase {
                EventDispatchPhase::AwaitingTargetAck => {
                    let accelerator_id = accelerator
                        .and_then(|key| self.dispatcher.accelerator(key))
                        .map(|accelerator| accelerator.id());
                    if let Some(accelerator_id) = accelerator_id {
                        debug!("Firing post-target accelerator {}", accelerator_id);
                        env.transport
                            .dispatch_accelerator(self.wm_client, accelerator_id, &in_flight.event, None);
                    }
                }
                EventDispatchPhase::AwaitingPreTargetAccelerator => {
                    self.with_dispatcher(env, |dispatcher, tree, delegate| {
                        dispatcher.process_event(tree, delegate, &in_flight.event, AcceleratorMatchPhase::PostOnly)
                    });
                }
                EventDispatchPhase::Idle => {}
            }
        }

        self.process_next_event_from_queue(env);
    }

    /// Feed queued events until one is in flight or the queue is empty
    fn process_next_event_from_queue(&mut self, env: &mut DispatchEnv<'_>) {
        while !self.pipeline.is_waiting() {
            let Some(queued) = self.pipeline.event_queue.pop_front() else {
                break;
            };
            match queued.processed_target {
                None => {
                    self.with_dispatcher(env, |dispatcher, tree, delegate| {
                        dispatcher.process_event(tree, delegate, &queued.event, AcceleratorMatchPhase::Any)
                    });
                }
                Some(target) if env.tree.contains_key(target.window) => {
                    self.pipeline.dispatch_to_client(
                        env,
                        target.window,
                        target.client_id,
                        &queued.event,
                        target.accelerator,
                    );
                }
                Some(_) => debug!("Dropping queued {:?}: target destroyed", queued.event.event_type),
            }
        }
    }

    // ------------------------------------------------------------------
    // Session control
    // ------------------------------------------------------------------

    /// Become the session receiving input; the mouse starts at `mouse_location`
    pub fn activate(&mut self, env: &mut DispatchEnv<'_>, mouse_location: Point) {
        info!("Activating session of {}", self.user_id);
        self.active = true;
        env.displays
            .user_display_manager_mut(&self.user_id)
            .on_mouse_cursor_location_changed(mouse_location);
        self.with_dispatcher(env, |dispatcher, tree, delegate| {
            dispatcher.reset(tree, delegate);
            dispatcher.set_mouse_pointer_screen_location(tree, delegate, mouse_location);
        });
    }

    /// Stop receiving input; queued events are dropped
    pub fn deactivate(&mut self, env: &mut DispatchEnv<'_>) {
        info!("Deactivating session of {}", self.user_id);
        self.with_dispatcher(env, |dispatcher, tree, delegate| dispatcher.reset(tree, delegate));
        self.active = false;
        let dropped = self.pipeline.event_queue.len();
        self.pipeline.event_queue.clear();
        if dropped > 0 {
            debug!("Dropped {} queued events", dropped);
        }
    }

    // ------------------------------------------------------------------
    // Window and policy changes
    // ------------------------------------------------------------------

    pub fn set_focused_window(&mut self, window: Option<WindowKey>) {
        self.focused_window = window;
    }

    pub fn set_capture_window(
        &mut self,
        env: &mut DispatchEnv<'_>,
        window: Option<WindowKey>,
        client_id: ClientId,
    ) -> WsResult<()> {
        self.with_dispatcher(env, |dispatcher, tree, delegate| {
            dispatcher.set_capture_window(tree, delegate, window, client_id)
        })
    }

    pub fn add_system_modal_window(&mut self, env: &mut DispatchEnv<'_>, window: WindowKey) -> WsResult<()> {
        self.with_dispatcher(env, |dispatcher, tree, delegate| {
            dispatcher.add_system_modal_window(tree, delegate, window)
        })
    }

    pub fn add_accelerator(&mut self, id: u32, matcher: EventMatcher) -> WsResult<AcceleratorKey> {
        self.dispatcher.add_accelerator(id, matcher)
    }

    pub fn remove_accelerator(&mut self, id: u32) -> bool {
        self.dispatcher.remove_accelerator(id)
    }

    pub fn on_tree_changed(&mut self, env: &mut DispatchEnv<'_>) {
        self.with_dispatcher(env, |dispatcher, tree, delegate| dispatcher.on_tree_changed(tree, delegate));
    }

    /// Called for each window being destroyed, before it leaves the tree
    pub fn on_window_destroyed(&mut self, env: &mut DispatchEnv<'_>, window: WindowKey) {
        if self.focused_window == Some(window) {
            self.focused_window = None;
        }
        self.with_dispatcher(env, |dispatcher, tree, delegate| {
            dispatcher.on_window_destroyed(tree, delegate, window)
        });
    }
}
