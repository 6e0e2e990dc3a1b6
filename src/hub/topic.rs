//! Topic membership
//!
//! A `Topic` maps each member connection to the join it is currently
//! using, plus the presence meta tracked for it on `room:*` topics.
//!
//! Callers must synchronize access (the hub lock) when modifying members.

use std::collections::HashMap;

use super::connection::ConnectionId;
use crate::presence::Meta;

#[derive(Debug, Clone)]
pub struct Member {
    pub join_ref: Option<String>,
    /// Presence key of the member's user.
    pub identity: String,
    /// Set only on presence-tracked topics.
    pub meta: Option<Meta>,
}

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub members: HashMap<ConnectionId, Member>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: HashMap::new(),
        }
    }

    /// Whether joins on this topic are presence-tracked.
    pub fn tracks_presence(&self) -> bool {
        self.name.starts_with("room:")
    }

    /// Adds or replaces a member. Returns the previous membership.
    pub fn join(&mut self, id: ConnectionId, member: Member) -> Option<Member> {
        self.members.insert(id, member)
    }

    pub fn leave(&mut self, id: &ConnectionId) -> Option<Member> {
        self.members.remove(id)
    }

    pub fn is_member(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }
}
