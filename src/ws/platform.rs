//! Platform Seams
//!
//! The dispatch core talks to the outside world through two traits: the
//! native display (capture and cursor) and the connection to clients.

use crate::ipc::ClientMessage;
use crate::ws::event::Event;
use crate::ws::ids::{ClientId, CursorId, WindowId};

/// Native display the server runs on
pub trait PlatformDisplay {
    /// Route all native input to the server, even outside its windows
    fn set_capture(&mut self);

    fn release_capture(&mut self);

    fn update_cursor(&mut self, cursor: CursorId);
}

/// Outgoing half of the client connections
pub trait ClientTransport {
    /// Queue `message` for `client_id`. Must not block.
    fn send(&mut self, client_id: ClientId, message: ClientMessage);

    fn dispatch_input_event(&mut self, client_id: ClientId, event_id: u32, window: WindowId, event: &Event) {
        self.send(client_id, ClientMessage::InputEvent { event_id, window, event: event.clone() });
    }

    /// `ack_id` is set when the window manager must answer
    fn dispatch_accelerator(&mut self, client_id: ClientId, accelerator_id: u32, event: &Event, ack_id: Option<u32>) {
        self.send(client_id, ClientMessage::Accelerator { accelerator_id, event: event.clone(), ack_id });
    }

    fn capture_lost(&mut self, client_id: ClientId, window: WindowId) {
        self.send(client_id, ClientMessage::CaptureLost { window });
    }

    /// Tell the window manager `client` became (un)responsive
    fn client_jankiness_changed(&mut self, wm_client: ClientId, client: ClientId, janky: bool) {
        self.send(wm_client, ClientMessage::ClientJankinessChanged { client, janky });
    }
}
