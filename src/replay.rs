//! Scenario Replay
//!
//! Builds a `WindowServer` from a TOML scenario and simulates its clients.
//! Simulated clients answer every event and pre-target accelerator after a
//! fixed latency with a fixed result, or never answer at all, which lets the
//! ack timeout and jankiness paths be exercised without real processes.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::ipc::{ClientMessage, ClientReply};
use crate::shared::{Geometry, Insets, Point};
use crate::ws::accelerator::EventMatcher;
use crate::ws::event::{Event, EventFlags, EventResult, EventType, KeyCode};
use crate::ws::ids::{ClientId, CursorId, UserId, WindowId};
use crate::ws::platform::{ClientTransport, PlatformDisplay};
use crate::ws::server::WindowServer;

/// Server type driven by a scenario
pub type ReplayServer = WindowServer<ReplayTransport, ReplayPlatform>;

/// A complete replay scenario
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    /// Display bounds in screen coordinates
    #[serde(default)]
    pub displays: Vec<Geometry>,
    /// User sessions; the first one starts active
    #[serde(default)]
    pub users: Vec<UserSpec>,
    #[serde(default)]
    pub clients: Vec<ClientSpec>,
    /// Created in order, so parents must precede their children
    #[serde(default)]
    pub windows: Vec<WindowSpec>,
    #[serde(default)]
    pub accelerators: Vec<AcceleratorSpec>,
    #[serde(default)]
    pub steps: Vec<TimedStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSpec {
    pub id: UserId,
    pub wm_client: ClientId,
}

/// How a simulated client answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSpec {
    pub id: ClientId,
    #[serde(default = "default_result")]
    pub result: EventResult,
    #[serde(default)]
    pub latency_ms: u64,
    /// Never acknowledge anything
    #[serde(default)]
    pub never: bool,
}

fn default_result() -> EventResult {
    EventResult::Handled
}

impl ClientSpec {
    fn responsive(id: ClientId) -> Self {
        Self { id, result: EventResult::Handled, latency_ms: 0, never: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSpec {
    pub id: WindowId,
    pub bounds: Geometry,
    /// Parent window; top-level windows go into the window manager root of
    /// `user` (default: first user) on display `display`
    #[serde(default)]
    pub parent: Option<WindowId>,
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default)]
    pub display: usize,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub modal: bool,
    #[serde(default)]
    pub system_modal: bool,
    #[serde(default)]
    pub transient_parent: Option<WindowId>,
    #[serde(default)]
    pub embedded_client: Option<ClientId>,
    #[serde(default)]
    pub client_area: Option<Insets>,
    #[serde(default)]
    pub cursor: Option<CursorId>,
    #[serde(default)]
    pub non_client_cursor: Option<CursorId>,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceleratorSpec {
    pub user: UserId,
    pub id: u32,
    pub matcher: EventMatcher,
}

/// A step scheduled `at_ms` after the replay starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub step: Step,
}

/// Something that happens to the server during replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Mouse {
        event_type: EventType,
        x: i32,
        y: i32,
        #[serde(default)]
        flags: EventFlags,
    },
    Touch {
        event_type: EventType,
        pointer_id: i32,
        x: i32,
        y: i32,
    },
    Key {
        event_type: EventType,
        key_code: KeyCode,
        #[serde(default)]
        flags: EventFlags,
    },
    /// A raw platform event
    Event { event: Event },
    Disconnect { client: ClientId },
    SwitchUser { user: UserId },
    Focus { window: Option<WindowId> },
    Capture { window: Option<WindowId>, client: ClientId },
    SetVisible { window: WindowId, visible: bool },
    Destroy { window: WindowId },
}

impl Scenario {
    /// Load a scenario from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {:?}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(content)
            .context("Failed to parse scenario")?;
        if scenario.displays.is_empty() {
            bail!("Scenario has no displays");
        }
        if scenario.users.is_empty() {
            bail!("Scenario has no users");
        }
        Ok(scenario)
    }

    /// Build the server and register every display, user, window and accelerator
    pub fn build(&self, ack_delay: Option<Duration>) -> Result<ReplayServer> {
        let mut server = WindowServer::new(ReplayPlatform::default(), ReplayTransport::default(), ack_delay);

        let mut displays = Vec::with_capacity(self.displays.len());
        for bounds in &self.displays {
            displays.push(server.add_display(*bounds)?);
        }
        for user in &self.users {
            server
                .add_user(user.id.clone(), user.wm_client)
                .with_context(|| format!("Failed to add user {}", user.id))?;
        }

        for spec in &self.windows {
            let window = server
                .create_window(spec.id, spec.bounds)
                .with_context(|| format!("Failed to create window {}", spec.id))?;
            let parent = match spec.parent {
                Some(parent) => server
                    .lookup(parent)
                    .with_context(|| format!("Unknown parent {} of window {}", parent, spec.id))?,
                None => {
                    let user = match (&spec.user, self.users.first()) {
                        (Some(user), _) => user,
                        (None, Some(first)) => &first.id,
                        (None, None) => bail!("Window {} has no parent and there are no users", spec.id),
                    };
                    let display = displays
                        .get(spec.display)
                        .and_then(|id| server.displays().display(*id))
                        .with_context(|| format!("Unknown display {} for window {}", spec.display, spec.id))?;
                    display
                        .wm_root(user)
                        .with_context(|| format!("User {} has no root on display {}", user, spec.display))?
                }
            };
            server.add_child(parent, window)?;
            server.set_visible(window, spec.visible)?;
            if spec.client_area.is_some() {
                server.set_client_area(window, spec.client_area)?;
            }
            if spec.embedded_client.is_some() {
                server.set_embedded_client(window, spec.embedded_client)?;
            }
            if spec.cursor.is_some() || spec.non_client_cursor.is_some() {
                let cursor = spec.cursor.unwrap_or_default();
                server.set_cursor(window, cursor, spec.non_client_cursor.unwrap_or(cursor))?;
            }
            if let Some(transient) = spec.transient_parent {
                let transient = server
                    .lookup(transient)
                    .with_context(|| format!("Unknown transient parent {} of window {}", transient, spec.id))?;
                server.set_transient_parent(window, Some(transient))?;
            }
            if spec.modal {
                server.set_modal(window)?;
            }
            if spec.system_modal {
                server.add_system_modal_window(window)?;
            }
        }

        for accelerator in &self.accelerators {
            server
                .add_accelerator(&accelerator.user, accelerator.id, accelerator.matcher)
                .with_context(|| format!("Failed to add accelerator {}", accelerator.id))?;
        }

        info!(
            "Scenario built: {} displays, {} users, {} windows, {} steps",
            self.displays.len(),
            self.users.len(),
            self.windows.len(),
            self.steps.len()
        );
        Ok(server)
    }

    /// Steps ordered by time; equal times keep file order
    pub fn timeline(&self) -> Vec<TimedStep> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|step| step.at_ms);
        steps
    }

    pub fn simulated_clients(&self) -> SimulatedClients {
        SimulatedClients {
            clients: self.clients.iter().map(|spec| (spec.id, *spec)).collect(),
        }
    }
}

impl Step {
    /// Apply this step to the server
    pub fn apply(&self, server: &mut ReplayServer) -> Result<()> {
        match self {
            Step::Mouse { event_type, x, y, flags } => {
                server.process_event(Event::mouse(*event_type, Point::new(*x, *y), *flags));
            }
            Step::Touch { event_type, pointer_id, x, y } => {
                server.process_event(Event::touch(*event_type, *pointer_id, Point::new(*x, *y)));
            }
            Step::Key { event_type, key_code, flags } => {
                server.process_event(Event::key(*event_type, *key_code, *flags));
            }
            Step::Event { event } => server.process_event(event.clone()),
            Step::Disconnect { client } => server.on_client_disconnected(*client),
            Step::SwitchUser { user } => server.set_active_user(user)?,
            Step::Focus { window } => {
                let window = lookup_optional(server, *window)?;
                server.set_focused_window(window)?;
            }
            Step::Capture { window, client } => {
                let window = lookup_optional(server, *window)?;
                server.set_capture_window(window, *client)?;
            }
            Step::SetVisible { window, visible } => {
                let key = lookup(server, *window)?;
                server.set_visible(key, *visible)?;
            }
            Step::Destroy { window } => {
                let key = lookup(server, *window)?;
                server.destroy_window(key)?;
            }
        }
        Ok(())
    }
}

fn lookup(server: &ReplayServer, id: WindowId) -> Result<crate::ws::window::WindowKey> {
    server.lookup(id).with_context(|| format!("Unknown window {}", id))
}

fn lookup_optional(server: &ReplayServer, id: Option<WindowId>) -> Result<Option<crate::ws::window::WindowKey>> {
    id.map(|id| lookup(server, id)).transpose()
}

/// A reply a simulated client will send after `delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledReply {
    pub delay: Duration,
    pub client: ClientId,
    pub reply: ClientReply,
}

/// Behaviour of every client in the scenario. Clients without an entry
/// answer immediately with `Handled`.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClients {
    clients: HashMap<ClientId, ClientSpec>,
}

impl SimulatedClients {
    fn spec(&self, client: ClientId) -> ClientSpec {
        self.clients.get(&client).copied().unwrap_or_else(|| ClientSpec::responsive(client))
    }

    /// Replies the clients will send for `messages`
    pub fn replies_for(&self, messages: &[(ClientId, ClientMessage)]) -> Vec<ScheduledReply> {
        let mut replies = Vec::new();
        for (client, message) in messages {
            let spec = self.spec(*client);
            let reply = match message {
                ClientMessage::InputEvent { event_id, .. } => {
                    ClientReply::EventAck { event_id: *event_id, result: spec.result }
                }
                ClientMessage::Accelerator { ack_id: Some(ack_id), .. } => {
                    ClientReply::AcceleratorAck { ack_id: *ack_id, result: spec.result }
                }
                _ => continue,
            };
            if spec.never {
                debug!("Client {} will never answer {:?}", client, reply);
                continue;
            }
            replies.push(ScheduledReply {
                delay: Duration::from_millis(spec.latency_ms),
                client: *client,
                reply,
            });
        }
        replies
    }
}

/// Transport that logs outgoing messages and keeps them for the simulated clients
#[derive(Debug, Default)]
pub struct ReplayTransport {
    outbox: Vec<(ClientId, ClientMessage)>,
    sent: usize,
}

impl ReplayTransport {
    /// Messages sent since the last call
    pub fn take(&mut self) -> Vec<(ClientId, ClientMessage)> {
        std::mem::take(&mut self.outbox)
    }

    /// Total number of messages sent
    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl ClientTransport for ReplayTransport {
    fn send(&mut self, client_id: ClientId, message: ClientMessage) {
        match &message {
            ClientMessage::InputEvent { event_id, window, event } => {
                info!("-> client {}: event {} {:?} to window {}", client_id, event_id, event.event_type, window);
            }
            ClientMessage::Accelerator { accelerator_id, ack_id, .. } => {
                info!("-> client {}: accelerator {} (ack id {:?})", client_id, accelerator_id, ack_id);
            }
            ClientMessage::CaptureLost { window } => {
                info!("-> client {}: capture lost by window {}", client_id, window);
            }
            ClientMessage::ClientJankinessChanged { client, janky } => {
                info!("-> client {}: client {} janky = {}", client_id, client, janky);
            }
        }
        self.sent += 1;
        self.outbox.push((client_id, message));
    }
}

/// Platform display that only logs and remembers what it was asked to do
#[derive(Debug, Default)]
pub struct ReplayPlatform {
    captured: bool,
    cursor: CursorId,
}

impl ReplayPlatform {
    pub fn is_captured(&self) -> bool {
        self.captured
    }

    pub fn cursor(&self) -> CursorId {
        self.cursor
    }
}

impl PlatformDisplay for ReplayPlatform {
    fn set_capture(&mut self) {
        debug!("Native capture set");
        self.captured = true;
    }

    fn release_capture(&mut self) {
        debug!("Native capture released");
        self.captured = false;
    }

    fn update_cursor(&mut self, cursor: CursorId) {
        if cursor != self.cursor {
            trace!("Cursor changed to {:?}", cursor);
        }
        self.cursor = cursor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
displays = [{ x = 0, y = 0, width = 800, height = 600 }]
users = [{ id = "alice", wm_client = 100 }]

[[clients]]
id = 1
latency_ms = 20

[[clients]]
id = 2
never = true

[[windows]]
id = { client_id = 1, local_id = 1 }
bounds = { x = 0, y = 0, width = 400, height = 600 }

[[windows]]
id = { client_id = 2, local_id = 1 }
bounds = { x = 400, y = 0, width = 400, height = 600 }

[[accelerators]]
user = "alice"
id = 7
matcher = { key_code = 84, flags = "CONTROL_DOWN" }

[[steps]]
at_ms = 10
step = "mouse"
event_type = "pointer_down"
x = 500
y = 10
flags = "LEFT_MOUSE_BUTTON"

[[steps]]
at_ms = 0
step = "mouse"
event_type = "pointer_moved"
x = 10
y = 10
"#;

    #[test]
    fn test_scenario_builds_server() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        let mut server = scenario.build(Some(Duration::from_millis(100))).unwrap();

        let alice = UserId::new("alice");
        assert_eq!(server.active_user(), Some(&alice));
        let left = server.lookup(WindowId::new(ClientId(1), 1)).unwrap();
        let wm_root = server.displays().displays().next().unwrap().wm_root(&alice).unwrap();
        assert_eq!(server.tree().parent(left), Some(wm_root));
        assert!(server.remove_accelerator(&alice, 7).unwrap());
    }

    #[test]
    fn test_timeline_is_sorted_by_time() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        let times: Vec<u64> = scenario.timeline().iter().map(|step| step.at_ms).collect();
        assert_eq!(times, vec![0, 10]);
    }

    #[test]
    fn test_steps_drive_simulated_clients() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        let clients = scenario.simulated_clients();
        let mut server = scenario.build(Some(Duration::from_millis(100))).unwrap();

        for timed in scenario.timeline() {
            timed.step.apply(&mut server).unwrap();
        }
        let messages = server.transport_mut().take();
        let replies = clients.replies_for(&messages);

        // The move reached client 1, which answers after its latency. The
        // press stays queued behind it.
        assert_eq!(
            replies,
            vec![ScheduledReply {
                delay: Duration::from_millis(20),
                client: ClientId(1),
                reply: ClientReply::EventAck { event_id: 1, result: EventResult::Handled },
            }]
        );
        server.handle_client_reply(ClientId(1), replies[0].reply);

        // The press first sends an exit to the window the mouse left.
        let messages = server.transport_mut().take();
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0],
            (ClientId(1), ClientMessage::InputEvent { event_id: 2, event, .. })
                if event.event_type == EventType::PointerExited
        ));
        let replies = clients.replies_for(&messages);
        server.handle_client_reply(ClientId(1), replies[0].reply);

        // Client 2 never answers the press.
        let messages = server.transport_mut().take();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, ClientId(2));
        assert!(clients.replies_for(&messages).is_empty());
        assert_eq!(server.state(&UserId::new("alice")).unwrap().awaited_client(), Some(ClientId(2)));
    }

    #[test]
    fn test_unknown_clients_answer_handled_immediately() {
        let clients = SimulatedClients::default();
        let messages = vec![
            (
                ClientId(100),
                ClientMessage::Accelerator {
                    accelerator_id: 7,
                    event: Event::key(EventType::KeyPressed, KeyCode::T, EventFlags::CONTROL_DOWN),
                    ack_id: Some(3),
                },
            ),
            (ClientId(5), ClientMessage::CaptureLost { window: WindowId::new(ClientId(5), 1) }),
        ];
        let replies = clients.replies_for(&messages);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].delay, Duration::ZERO);
        assert_eq!(replies[0].reply, ClientReply::AcceleratorAck { ack_id: 3, result: EventResult::Handled });
    }

    #[test]
    fn test_scenario_without_displays_is_rejected() {
        let err = Scenario::parse("users = [{ id = \"alice\", wm_client = 100 }]\n").unwrap_err();
        assert!(err.to_string().contains("no displays"));
    }

    #[test]
    fn test_unknown_window_step_is_an_error() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        let mut server = scenario.build(None).unwrap();
        let step = Step::Destroy { window: WindowId::new(ClientId(9), 9) };
        assert!(step.apply(&mut server).is_err());
    }
}
