//! Presence data model and merge algorithm.
//!
//! A [`PresenceState`] maps an identity (a user's presence key) to the
//! ordered list of [`Meta`] records, one per open connection. The only ways
//! to derive a new state are [`initialize`] (snapshot overwrite) and
//! [`apply_diff`] (incremental merge). Both are pure: they never touch the
//! input state, so a previous snapshot handed to a renderer stays valid.
//!
//! Invariant: an identity present in a state owns at least one meta. Empty
//! entries are pruned on every path that could produce them.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// One connection's metadata under an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Server-assigned connection reference, unique per tracked connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phx_ref: Option<String>,
    pub user_id: u64,
    pub username: String,
    /// Milliseconds since the epoch when the connection was tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    pub fn new(user_id: u64, username: impl Into<String>) -> Self {
        Self {
            phx_ref: None,
            user_id,
            username: username.into(),
            online_at: None,
            extra: Map::new(),
        }
    }

    pub fn with_ref(mut self, phx_ref: impl Into<String>) -> Self {
        self.phx_ref = Some(phx_ref.into());
        self
    }

    pub fn with_online_at(mut self, online_at: i64) -> Self {
        self.online_at = Some(online_at);
        self
    }

    /// Whether both records describe the same connection.
    ///
    /// Refs win when both sides carry one; otherwise the records must match
    /// field for field.
    pub fn same_connection(&self, other: &Meta) -> bool {
        match (&self.phx_ref, &other.phx_ref) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

/// All metas of one identity, in join order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    /// Metas that fail to parse are dropped so they cannot sink the rest of
    /// a snapshot or diff.
    #[serde(deserialize_with = "skip_malformed_metas")]
    pub metas: Vec<Meta>,
}

fn skip_malformed_metas<'de, D>(deserializer: D) -> Result<Vec<Meta>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Meta>(value) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(error = %e, "skipping malformed presence meta");
                None
            }
        })
        .collect())
}

/// Identity -> metas. Ordered so listing and rendering are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceState(BTreeMap<String, Presence>);

impl PresenceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.0.contains_key(identity)
    }

    pub fn get(&self, identity: &str) -> Option<&Presence> {
        self.0.get(identity)
    }

    pub fn metas(&self, identity: &str) -> &[Meta] {
        self.0
            .get(identity)
            .map(|p| p.metas.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Presence)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn pruned(mut self) -> Self {
        self.0.retain(|_, presence| !presence.metas.is_empty());
        self
    }
}

impl FromIterator<(String, Vec<Meta>)> for PresenceState {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Meta>)>>(iter: I) -> Self {
        PresenceState(
            iter.into_iter()
                .map(|(identity, metas)| (identity, Presence { metas }))
                .collect(),
        )
        .pruned()
    }
}

/// Incremental change since the last known state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    #[serde(default)]
    pub joins: BTreeMap<String, Presence>,
    #[serde(default)]
    pub leaves: BTreeMap<String, Presence>,
}

impl Diff {
    pub fn join(identity: impl Into<String>, meta: Meta) -> Self {
        let mut diff = Diff::default();
        diff.joins.insert(identity.into(), Presence { metas: vec![meta] });
        diff
    }

    pub fn leave(identity: impl Into<String>, meta: Meta) -> Self {
        let mut diff = Diff::default();
        diff.leaves
            .insert(identity.into(), Presence { metas: vec![meta] });
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.leaves.is_empty()
    }
}

/// Replaces whatever was known with a fresh snapshot.
pub fn initialize(snapshot: PresenceState) -> PresenceState {
    snapshot.pruned()
}

/// Produces the state that results from applying `diff` to `current`.
///
/// Leaves are applied before joins, so a leave-then-rejoin inside one diff
/// survives. Leaves for unknown identities or metas are ignored. A joined
/// meta that already denotes an existing connection is not appended again.
pub fn apply_diff(current: &PresenceState, diff: &Diff) -> PresenceState {
    let mut next = current.clone();

    for (identity, left) in &diff.leaves {
        let Some(presence) = next.0.get_mut(identity) else {
            continue;
        };
        presence
            .metas
            .retain(|meta| !left.metas.iter().any(|gone| gone.same_connection(meta)));
        if presence.metas.is_empty() {
            next.0.remove(identity);
        }
    }

    for (identity, joined) in &diff.joins {
        if joined.metas.is_empty() {
            continue;
        }
        let presence = next.0.entry(identity.clone()).or_default();
        for meta in &joined.metas {
            if !presence.metas.iter().any(|m| m.same_connection(meta)) {
                presence.metas.push(meta.clone());
            }
        }
    }

    next
}

/// One row of the online-users panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineUser {
    pub identity: String,
    pub user_id: u64,
    pub username: String,
}

/// Maps every identity through `chooser`, in identity order.
pub fn list_by<T, F>(state: &PresenceState, mut chooser: F) -> Vec<T>
where
    F: FnMut(&str, &Presence) -> T,
{
    state.iter().map(|(id, p)| chooser(id, p)).collect()
}

/// Online users, one per identity, described by their first connection.
pub fn list(state: &PresenceState) -> Vec<OnlineUser> {
    state
        .iter()
        .filter_map(|(identity, presence)| {
            presence.metas.first().map(|first| OnlineUser {
                identity: identity.to_string(),
                user_id: first.user_id,
                username: first.username.clone(),
            })
        })
        .collect()
}
