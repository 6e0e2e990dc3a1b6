//! Hub engine
//!
//! The in-memory side of the development hub. It:
//! - tracks which connections are members of which topics
//! - answers joins, leaves and heartbeats with `phx_reply`
//! - tracks presence on `room:*` topics, pushing `presence_state` to a joiner
//!   and `presence_diff` to everyone else
//! - relays any other event pushed on a joined topic to the other members
//!
//! The API is synchronous and meant to sit behind a lock
//! (`Arc<Mutex<Hub>>`). Sends go through unbounded per-connection queues, so
//! no network I/O happens while the lock is held.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{Connection, ConnectionId};
use super::topic::{Member, Topic};
use crate::presence::{self, Diff, Meta, PRESENCE_DIFF, PRESENCE_STATE, PresenceState};
use crate::transport::frame::{Frame, HEARTBEAT, PHOENIX_TOPIC, PHX_JOIN, PHX_LEAVE, ReplyStatus};

#[derive(Debug, Default)]
pub struct Hub {
    pub topics: HashMap<String, Topic>,
    pub connections: HashMap<ConnectionId, Connection>,
    presences: HashMap<String, PresenceState>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connection(&mut self, connection: Connection) {
        info!(
            connection = %connection.id,
            user = %connection.user.username,
            "connection registered"
        );
        self.connections.insert(connection.id.clone(), connection);
    }

    pub fn remove_connection(&mut self, id: &ConnectionId) {
        self.connections.remove(id);
    }

    /// Presence currently tracked on `topic`.
    pub fn presence(&self, topic: &str) -> Option<&PresenceState> {
        self.presences.get(topic)
    }

    pub fn handle_frame(&mut self, id: &ConnectionId, frame: Frame) {
        match (frame.topic.as_str(), frame.event.as_str()) {
            (PHOENIX_TOPIC, HEARTBEAT) => self.reply(id, &frame, ReplyStatus::Ok, json!({})),
            (_, PHX_JOIN) => self.join(id, &frame),
            (_, PHX_LEAVE) => {
                self.leave(id, &frame.topic);
                self.reply(id, &frame, ReplyStatus::Ok, json!({}));
            }
            _ => self.relay(id, frame),
        }
    }

    /// Sends `event` to every member of `topic`.
    pub fn broadcast(&self, topic: &str, event: &str, payload: Value) {
        self.broadcast_from(None, topic, event, payload);
    }

    /// Leaves every topic the connection is in, then forgets it.
    pub fn cleanup_connection(&mut self, id: &ConnectionId) {
        let joined = self
            .topics
            .values()
            .filter(|topic| topic.is_member(id))
            .map(|topic| topic.name.clone())
            .collect::<Vec<_>>();

        for topic in joined {
            self.leave(id, &topic);
            debug!(connection = %id, %topic, "left on cleanup");
        }

        self.remove_connection(id);
        info!(connection = %id, "cleaned up connection");
    }

    fn join(&mut self, id: &ConnectionId, frame: &Frame) {
        let Some(user) = self.connections.get(id).map(|c| c.user.clone()) else {
            warn!(connection = %id, "join from unknown connection");
            return;
        };

        if self
            .topics
            .get(&frame.topic)
            .is_some_and(|topic| topic.is_member(id))
        {
            self.leave(id, &frame.topic);
        }

        let topic = self
            .topics
            .entry(frame.topic.clone())
            .or_insert_with(|| Topic::new(&frame.topic));

        let meta = topic.tracks_presence().then(|| {
            Meta::new(user.user_id, user.username.clone())
                .with_ref(Uuid::new_v4().to_string())
                .with_online_at(chrono::Utc::now().timestamp_millis())
        });

        topic.join(
            id.clone(),
            Member {
                join_ref: frame.join_ref.clone(),
                identity: user.identity.clone(),
                meta: meta.clone(),
            },
        );
        info!(connection = %id, topic = %frame.topic, "joined");
        self.reply(id, frame, ReplyStatus::Ok, json!({}));

        let Some(meta) = meta else {
            return;
        };
        let diff = Diff::join(user.identity, meta);
        let state = self.presences.entry(frame.topic.clone()).or_default();
        *state = presence::apply_diff(state, &diff);

        if let Some(payload) = to_payload(state) {
            let push = Frame::new(frame.topic.clone(), PRESENCE_STATE, payload)
                .with_refs(frame.join_ref.clone(), None);
            self.send(id, &push);
        }
        if let Some(payload) = to_payload(&diff) {
            self.broadcast_from(Some(id), &frame.topic, PRESENCE_DIFF, payload);
        }
    }

    fn leave(&mut self, id: &ConnectionId, topic_name: &str) {
        let Some(topic) = self.topics.get_mut(topic_name) else {
            return;
        };
        let Some(member) = topic.leave(id) else {
            return;
        };
        let topic_empty = topic.members.is_empty();
        if topic_empty {
            self.topics.remove(topic_name);
        }
        info!(connection = %id, topic = %topic_name, "left");

        let Some(meta) = member.meta else {
            return;
        };
        let diff = Diff::leave(member.identity, meta);
        if let Some(state) = self.presences.get_mut(topic_name) {
            *state = presence::apply_diff(state, &diff);
        }
        if topic_empty {
            self.presences.remove(topic_name);
        } else if let Some(payload) = to_payload(&diff) {
            self.broadcast_from(Some(id), topic_name, PRESENCE_DIFF, payload);
        }
    }

    fn relay(&mut self, id: &ConnectionId, frame: Frame) {
        let is_member = self
            .topics
            .get(&frame.topic)
            .is_some_and(|topic| topic.is_member(id));

        if !is_member {
            warn!(
                connection = %id,
                topic = %frame.topic,
                event = %frame.event,
                "push on unmatched topic"
            );
            self.reply(id, &frame, ReplyStatus::Error, json!({ "reason": "unmatched topic" }));
            return;
        }

        self.reply(id, &frame, ReplyStatus::Ok, json!({}));
        debug!(connection = %id, topic = %frame.topic, event = %frame.event, "relaying");
        self.broadcast_from(Some(id), &frame.topic, &frame.event, frame.payload);
    }

    fn broadcast_from(
        &self,
        sender: Option<&ConnectionId>,
        topic: &str,
        event: &str,
        payload: Value,
    ) {
        let Some(topic) = self.topics.get(topic) else {
            debug!(%topic, "broadcast to unknown topic");
            return;
        };
        let frame = Frame::new(topic.name.clone(), event, payload);
        for member_id in topic.members.keys() {
            if Some(member_id) != sender {
                self.send(member_id, &frame);
            }
        }
    }

    fn reply(&self, id: &ConnectionId, frame: &Frame, status: ReplyStatus, response: Value) {
        self.send(id, &frame.reply(status, response));
    }

    fn send(&self, id: &ConnectionId, frame: &Frame) {
        let Some(connection) = self.connections.get(id) else {
            debug!(connection = %id, "no connection registered");
            return;
        };
        match frame.to_ws() {
            Ok(message) => {
                if let Err(e) = connection.sender.send(message) {
                    warn!(connection = %id, error = %e, "failed to queue frame");
                }
            }
            Err(e) => warn!(connection = %id, error = %e, "failed to encode frame"),
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(error = %e, "failed to serialize payload");
            None
        }
    }
}
