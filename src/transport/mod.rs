//! The `transport` module is the client side of the channel protocol.
//!
//! - `frame`: the JSON array wire format and reply payloads.
//! - `channel`: joinable topic scopes with per-event listeners.
//! - `socket`: the WebSocket connection that carries every channel.
//!
//! The presence and topic layers only depend on the [`Transport`] trait and
//! [`Channel`], so they can be driven without a network connection.

pub mod channel;
pub mod frame;
pub mod socket;

use serde_json::Value;

pub use channel::{BindingRef, Channel, ChannelState, JoinRequest, Outbound, WeakChannel};
pub use frame::{Frame, Reply, ReplyStatus};
pub use socket::{Socket, SocketOptions};

/// Anything that can open channels by topic.
pub trait Transport: Send + Sync {
    fn channel(&self, topic: &str, params: Value) -> Channel;
}
