//! Presence tracking
//!
//! - `state`: the data model and the pure merge functions.
//! - `store`: the owned, rendering view of one channel's presence.
//! - `binding`: named channel handlers that feed a store.

pub mod binding;
pub mod state;
pub mod store;

pub use binding::{PRESENCE_DIFF, PRESENCE_STATE, SharedStore, track};
pub use state::{
    Diff, Meta, OnlineUser, Presence, PresenceState, apply_diff, initialize, list, list_by,
};
pub use store::{MAX_PENDING_DIFFS, PendingRender, PresenceStore};

#[cfg(test)]
mod tests;
