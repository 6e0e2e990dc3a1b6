//! Wire frames
//!
//! Frames use the Phoenix v2 JSON serializer: a five element array
//! `[join_ref, ref, topic, event, payload]`. Refs are strings or `null`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tungstenite::protocol::Message as WsMessage;

use crate::utils::Result;

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";
/// Topic reserved for socket-level traffic such as heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFrame", into = "RawFrame")]
pub struct Frame {
    pub join_ref: Option<String>,
    pub reference: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

#[derive(Serialize, Deserialize)]
struct RawFrame(Option<String>, Option<String>, String, String, Value);

impl From<RawFrame> for Frame {
    fn from(raw: RawFrame) -> Self {
        let RawFrame(join_ref, reference, topic, event, payload) = raw;
        Frame {
            join_ref,
            reference,
            topic,
            event,
            payload,
        }
    }
}

impl From<Frame> for RawFrame {
    fn from(frame: Frame) -> Self {
        RawFrame(
            frame.join_ref,
            frame.reference,
            frame.topic,
            frame.event,
            frame.payload,
        )
    }
}

/// Outcome carried by a `phx_reply` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub response: Value,
}

impl Frame {
    /// A frame without refs, as used for broadcasts.
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Frame {
            join_ref: None,
            reference: None,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    pub fn with_refs(mut self, join_ref: Option<String>, reference: Option<String>) -> Self {
        self.join_ref = join_ref;
        self.reference = reference;
        self
    }

    pub fn heartbeat(reference: String) -> Self {
        Frame::new(PHOENIX_TOPIC, HEARTBEAT, json!({})).with_refs(None, Some(reference))
    }

    /// Builds the `phx_reply` answering this frame.
    pub fn reply(&self, status: ReplyStatus, response: Value) -> Frame {
        Frame {
            join_ref: self.join_ref.clone(),
            reference: self.reference.clone(),
            topic: self.topic.clone(),
            event: PHX_REPLY.to_string(),
            payload: json!({ "status": status, "response": response }),
        }
    }

    /// Parses the payload of a `phx_reply`. `None` for any other frame or a
    /// reply without a recognizable status.
    pub fn as_reply(&self) -> Option<Reply> {
        if self.event != PHX_REPLY {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Frame> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_ws(&self) -> Result<WsMessage> {
        Ok(WsMessage::text(self.encode()?))
    }
}
