//! Development hub
//!
//! A small channel server speaking the same protocol as the client side of
//! this crate. It tracks presence on `room:*` topics and relays client events
//! such as `topic:<id>:new_reply` to the other members of a topic, so the
//! client can be exercised without the forum backend.
//!
//! Identity comes from the `user_id`/`username` connect params and is not
//! verified.

pub mod connection;
pub mod engine;
pub mod server;
pub mod topic;

pub use connection::{Connection, ConnectionId, HubUser};
pub use engine::Hub;
pub use server::{serve, start_hub_server};
