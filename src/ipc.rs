//! Client Protocol
//!
//! Messages exchanged between the window server and its clients. Every
//! dispatched input event or accelerator that needs an answer carries an id;
//! the client replies with a `ClientReply` naming that id.

use serde::{Deserialize, Serialize};

use crate::ws::event::{Event, EventResult};
use crate::ws::ids::{ClientId, WindowId};

// ============================================================================
// Server → Client
// ============================================================================

/// Messages sent from the window server to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// An input event for `window`; answer with `ClientReply::EventAck`
    InputEvent {
        event_id: u32,
        window: WindowId,
        event: Event,
    },

    /// An accelerator fired. Pre-target accelerators carry an `ack_id` and
    /// must be answered with `ClientReply::AcceleratorAck`.
    Accelerator {
        accelerator_id: u32,
        event: Event,
        ack_id: Option<u32>,
    },

    /// `window` no longer has explicit capture
    CaptureLost { window: WindowId },

    /// Sent to the window manager when a client stops (or resumes)
    /// answering events in time
    ClientJankinessChanged { client: ClientId, janky: bool },
}

// ============================================================================
// Client → Server
// ============================================================================

/// Replies sent from a client to the window server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientReply {
    EventAck { event_id: u32, result: EventResult },
    AcceleratorAck { ack_id: u32, result: EventResult },
}

// ============================================================================
// Message Framing
// ============================================================================

/// A framed message with length prefix for reliable socket reads
#[derive(Debug)]
pub struct FramedMessage {
    data: Vec<u8>,
    /// Payload length as written in the header
    len: u32,
}

impl FramedMessage {
    pub const HEADER_LEN: usize = 4;

    /// Create a new framed message from serializable data. Fails if the
    /// payload does not fit the 32-bit length header.
    pub fn new<T: Serialize>(msg: &T) -> anyhow::Result<Self> {
        let data = serde_json::to_vec(msg)?;
        let len = Self::frame_len(data.len())?;
        Ok(Self { data, len })
    }

    fn frame_len(payload_len: usize) -> anyhow::Result<u32> {
        u32::try_from(payload_len)
            .map_err(|_| anyhow::anyhow!("Payload of {} bytes is too large to frame", payload_len))
    }

    /// Encode message with length prefix (4 bytes, big-endian)
    pub fn encode(&self) -> Vec<u8> {
        let len = self.len;
        let mut buf = Vec::with_capacity(Self::HEADER_LEN + self.data.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Split one complete frame off the front of `buf`. Returns the payload
    /// and the number of bytes consumed, or `None` if more bytes are needed.
    pub fn split_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
        let header: [u8; Self::HEADER_LEN] = buf.get(..Self::HEADER_LEN)?.try_into().ok()?;
        let len = u32::from_be_bytes(header) as usize;
        let end = Self::HEADER_LEN.checked_add(len)?;
        let payload = buf.get(Self::HEADER_LEN..end)?;
        Some((payload, end))
    }

    /// Decode a server message from a payload
    pub fn decode_client_message(data: &[u8]) -> anyhow::Result<ClientMessage> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Decode a client reply from a payload
    pub fn decode_client_reply(data: &[u8]) -> anyhow::Result<ClientReply> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Point;
    use crate::ws::event::{EventFlags, EventType};

    #[test]
    fn test_input_event_survives_framing() {
        let message = ClientMessage::InputEvent {
            event_id: 17,
            window: WindowId::new(ClientId(3), 9),
            event: Event::mouse(EventType::PointerDown, Point::new(4, 5), EventFlags::LEFT_MOUSE_BUTTON),
        };

        let framed = FramedMessage::new(&message).unwrap().encode();
        let (payload, consumed) = FramedMessage::split_frame(&framed).unwrap();
        assert_eq!(consumed, framed.len());

        match FramedMessage::decode_client_message(payload).unwrap() {
            ClientMessage::InputEvent { event_id, window, event } => {
                assert_eq!(event_id, 17);
                assert_eq!(window, WindowId::new(ClientId(3), 9));
                assert_eq!(event.location(), Some(Point::new(4, 5)));
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_split_frame_waits_for_full_payload() {
        let reply = ClientReply::EventAck { event_id: 1, result: EventResult::Handled };
        let framed = FramedMessage::new(&reply).unwrap().encode();

        assert!(FramedMessage::split_frame(&framed[..2]).is_none());
        assert!(FramedMessage::split_frame(&framed[..framed.len() - 1]).is_none());

        let mut two = framed.clone();
        two.extend_from_slice(&framed);
        let (payload, consumed) = FramedMessage::split_frame(&two).unwrap();
        assert_eq!(consumed, framed.len());
        assert_eq!(FramedMessage::decode_client_reply(payload).unwrap(), reply);
    }

    #[test]
    fn test_oversized_payload_cannot_be_framed() {
        assert_eq!(FramedMessage::frame_len(1024).unwrap(), 1024);
        assert_eq!(FramedMessage::frame_len(u32::MAX as usize).unwrap(), u32::MAX);
        if let Some(too_big) = (u32::MAX as usize).checked_add(1) {
            assert!(FramedMessage::frame_len(too_big).is_err());
        }
    }

    #[test]
    fn test_reply_wire_format() {
        let json = r#"{"type":"AcceleratorAck","ack_id":4,"result":"unhandled"}"#;
        let reply = FramedMessage::decode_client_reply(json.as_bytes()).unwrap();
        assert_eq!(reply, ClientReply::AcceleratorAck { ack_id: 4, result: EventResult::Unhandled });
    }
}
