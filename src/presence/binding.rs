//! Wires a channel's presence events into a [`PresenceStore`].

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::warn;

use super::state::{Diff, PresenceState};
use super::store::PresenceStore;
use crate::transport::Channel;

pub const PRESENCE_STATE: &str = "presence_state";
pub const PRESENCE_DIFF: &str = "presence_diff";

pub type SharedStore = Arc<Mutex<PresenceStore>>;

/// Feeds `presence_state` and `presence_diff` events of `channel` into
/// `store`, and clears the store whenever the channel (re)joins.
///
/// Call before joining so the first join also resets the store. The sink
/// runs after the store's lock is released, so it may read the store.
pub fn track(channel: &Channel, store: SharedStore) {
    let on_join = Arc::clone(&store);
    channel.on_joined(move |_| handle_join(&on_join));

    let on_state = Arc::clone(&store);
    channel.on(PRESENCE_STATE, move |payload| handle_state(&on_state, payload));

    channel.on(PRESENCE_DIFF, move |payload| handle_diff(&store, payload));
}

fn handle_join(store: &Mutex<PresenceStore>) {
    lock(store).reset();
}

fn handle_state(store: &Mutex<PresenceStore>, payload: &Value) {
    match serde_json::from_value::<PresenceState>(payload.clone()) {
        Ok(snapshot) => {
            let pending = lock(store).sync_state(snapshot);
            pending.render();
        }
        Err(e) => warn!(error = %e, "ignoring malformed presence_state"),
    }
}

fn handle_diff(store: &Mutex<PresenceStore>, payload: &Value) {
    match serde_json::from_value::<Diff>(payload.clone()) {
        Ok(diff) => {
            let pending = lock(store).sync_diff(diff);
            if let Some(pending) = pending {
                pending.render();
            }
        }
        Err(e) => warn!(error = %e, "ignoring malformed presence_diff"),
    }
}

fn lock(store: &Mutex<PresenceStore>) -> std::sync::MutexGuard<'_, PresenceStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}
