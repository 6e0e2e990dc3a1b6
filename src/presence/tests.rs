use std::sync::{Arc, Mutex, OnceLock};

use serde_json::json;

use super::state::{Diff, Meta, PresenceState, apply_diff, initialize, list, list_by};
use super::store::{MAX_PENDING_DIFFS, PresenceStore};
use super::{PRESENCE_DIFF, PRESENCE_STATE, SharedStore, track};
use crate::render::PresentationSink;
use crate::tests::support::{MemoryTransport, RecordingSink};
use crate::transport::Transport;

fn alice() -> Meta {
    Meta::new(1, "alice").with_ref("a1")
}

fn bob() -> Meta {
    Meta::new(2, "bob").with_ref("b1")
}

fn state_of(entries: &[(&str, Vec<Meta>)]) -> PresenceState {
    entries
        .iter()
        .map(|(id, metas)| (id.to_string(), metas.clone()))
        .collect()
}

#[test]
fn test_initialize_overwrites_and_prunes_empty_identities() {
    let snapshot = state_of(&[("1", vec![alice()]), ("9", vec![])]);
    let state = initialize(snapshot);
    assert_eq!(state.len(), 1);
    assert!(state.contains("1"));
    assert!(!state.contains("9"));
}

#[test]
fn test_empty_snapshot_is_valid() {
    let state = initialize(PresenceState::new());
    assert!(state.is_empty());
    assert!(list(&state).is_empty());
}

#[test]
fn test_leave_then_join_within_one_diff() {
    let m1 = Meta::new(1, "alice");
    let m2 = Meta::new(1, "alice").with_online_at(2);
    let current = state_of(&[("A", vec![m1.clone()])]);

    let mut diff = Diff::leave("A", m1);
    diff.joins = Diff::join("A", m2.clone()).joins;

    let next = apply_diff(&current, &diff);
    assert_eq!(next, state_of(&[("A", vec![m2])]));
}

#[test]
fn test_rejoin_of_same_connection_within_one_diff_survives() {
    let current = state_of(&[("1", vec![alice()])]);
    let mut diff = Diff::leave("1", alice());
    diff.joins = Diff::join("1", alice()).joins;

    let next = apply_diff(&current, &diff);
    assert_eq!(next.metas("1"), &[alice()]);
}

#[test]
fn test_full_departure_removes_identity() {
    let current = state_of(&[("A", vec![alice()])]);
    let next = apply_diff(&current, &Diff::leave("A", alice()));
    assert!(next.is_empty());
    assert!(!next.contains("A"));
}

#[test]
fn test_partial_departure_keeps_other_connections() {
    let second_tab = Meta::new(1, "alice").with_ref("a2");
    let current = state_of(&[("1", vec![alice(), second_tab.clone()])]);

    let next = apply_diff(&current, &Diff::leave("1", alice()));
    assert_eq!(next.metas("1"), &[second_tab.clone()]);

    let gone = apply_diff(&next, &Diff::leave("1", second_tab));
    assert!(gone.is_empty());
}

#[test]
fn test_unknown_leave_is_a_noop() {
    let current = state_of(&[("1", vec![alice()])]);

    let unknown_identity = apply_diff(&current, &Diff::leave("B", bob()));
    assert_eq!(unknown_identity, current);

    let stranger = Meta::new(1, "alice").with_ref("zz");
    let unknown_meta = apply_diff(&current, &Diff::leave("1", stranger));
    assert_eq!(unknown_meta, current);
}

#[test]
fn test_join_appends_to_existing_identity() {
    let second_tab = Meta::new(1, "alice").with_ref("a2");
    let current = state_of(&[("1", vec![alice()])]);

    let next = apply_diff(&current, &Diff::join("1", second_tab.clone()));
    assert_eq!(next.metas("1"), &[alice(), second_tab]);
}

#[test]
fn test_duplicate_join_is_not_appended_twice() {
    let current = state_of(&[("1", vec![alice()])]);
    let next = apply_diff(&current, &Diff::join("1", alice()));
    assert_eq!(next, current);
}

#[test]
fn test_join_with_no_metas_creates_nothing() {
    let mut diff = Diff::default();
    diff.joins.insert("7".to_string(), Default::default());
    let next = apply_diff(&PresenceState::new(), &diff);
    assert!(next.is_empty());
}

#[test]
fn test_apply_diff_leaves_input_untouched() {
    let current = state_of(&[("1", vec![alice()])]);
    let before = current.clone();
    let _ = apply_diff(&current, &Diff::leave("1", alice()));
    assert_eq!(current, before);
}

#[test]
fn test_merge_is_deterministic() {
    let diffs = vec![
        Diff::join("2", bob()),
        Diff::join("1", Meta::new(1, "alice").with_ref("a2")),
        Diff::leave("1", alice()),
        Diff::leave("3", Meta::new(3, "carol").with_ref("c1")),
    ];
    let run = || {
        diffs.iter().fold(
            initialize(state_of(&[("1", vec![alice()])])),
            |state, diff| apply_diff(&state, diff),
        )
    };

    let first = run();
    for _ in 0..10 {
        assert_eq!(run(), first);
    }
    assert_eq!(first.len(), 2);
}

#[test]
fn test_list_uses_first_meta_per_identity() {
    let state = state_of(&[
        ("2", vec![bob()]),
        ("1", vec![alice(), Meta::new(1, "alice-phone").with_ref("a2")]),
    ]);

    let users = list(&state);
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].identity, "1");
    assert_eq!(users[0].username, "alice");
    assert_eq!(users[1].user_id, 2);

    let counts = list_by(&state, |id, presence| (id.to_string(), presence.metas.len()));
    assert_eq!(counts, vec![("1".to_string(), 2), ("2".to_string(), 1)]);
}

#[test]
fn test_wire_format_round_trip_keeps_extra_fields() {
    let payload = json!({
        "1": { "metas": [
            { "phx_ref": "F1", "user_id": 1, "username": "alice", "device": "phone" }
        ] }
    });
    let state: PresenceState = serde_json::from_value(payload.clone()).unwrap();
    let meta = &state.metas("1")[0];
    assert_eq!(meta.phx_ref.as_deref(), Some("F1"));
    assert_eq!(meta.extra.get("device"), Some(&json!("phone")));
    assert_eq!(serde_json::to_value(&state).unwrap(), payload);

    let diff: Diff = serde_json::from_value(json!({ "leaves": { "1": { "metas": [] } } })).unwrap();
    assert!(diff.joins.is_empty());
    assert_eq!(diff.leaves.len(), 1);
}

#[test]
fn test_same_connection_without_refs_compares_fields() {
    let a = Meta::new(1, "alice");
    assert!(a.same_connection(&Meta::new(1, "alice")));
    assert!(!a.same_connection(&Meta::new(1, "alice").with_online_at(5)));
    assert!(!a.same_connection(&alice()));
}

#[test]
fn test_store_snapshot_then_diff_renders_each_change() {
    let sink = RecordingSink::new();
    let mut store = PresenceStore::new(sink.clone());

    let a = Meta::new(1, "alice");
    store.initialize(state_of(&[("A", vec![a.clone()])]));
    assert_eq!(sink.renders().len(), 1);
    assert_eq!(sink.last_render().unwrap().len(), 1);

    store.apply_diff(Diff::join("B", Meta::new(2, "bob")));
    let renders = sink.renders();
    assert_eq!(renders.len(), 2);
    let latest = &renders[1];
    assert_eq!(latest.len(), 2);
    assert_eq!(latest.metas("A"), &[a]);
}

#[test]
fn test_store_buffers_diffs_until_snapshot() {
    let sink = RecordingSink::new();
    let mut store = PresenceStore::new(sink.clone());

    assert!(store.apply_diff(Diff::join("2", bob())).is_none());
    assert!(store.apply_diff(Diff::leave("1", alice())).is_none());
    assert_eq!(store.pending_diffs(), 2);
    assert!(sink.renders().is_empty());
    assert!(!store.is_synced());
    assert!(store.state().is_empty());

    // the snapshot already reflects bob's join
    let state = store.initialize(state_of(&[("1", vec![alice()]), ("2", vec![bob()])]));
    assert_eq!(sink.renders().len(), 1);
    assert_eq!(store.pending_diffs(), 0);
    assert_eq!(*state, state_of(&[("2", vec![bob()])]));
}

#[test]
fn test_store_keeps_previous_snapshot_intact() {
    let sink = RecordingSink::new();
    let mut store = PresenceStore::new(sink.clone());

    let before = store.initialize(state_of(&[("1", vec![alice()])]));
    let after = store.apply_diff(Diff::leave("1", alice())).unwrap();

    assert!(before.contains("1"));
    assert!(after.is_empty());
    assert!(store.state().is_empty());
    assert!(sink.last_render().unwrap().is_empty());
}

#[test]
fn test_store_reset_restarts_buffering() {
    let sink = RecordingSink::new();
    let mut store = PresenceStore::new(sink.clone());
    store.initialize(state_of(&[("1", vec![alice()])]));

    store.reset();
    assert!(!store.is_synced());
    assert!(store.apply_diff(Diff::join("2", bob())).is_none());
    assert_eq!(sink.renders().len(), 1);
}

#[test]
fn test_track_feeds_store_from_channel_events() {
    let transport = MemoryTransport::new();
    let sink = RecordingSink::new();
    let store = Arc::new(Mutex::new(PresenceStore::new(sink.clone())));

    let lobby = transport.channel("room:lobby", json!({}));
    track(&lobby, store.clone());
    lobby.join().unwrap();
    transport.accept_joins();

    // a diff racing ahead of the snapshot is held back
    transport.push("room:lobby", PRESENCE_DIFF, json!({
        "joins": { "2": { "metas": [{ "phx_ref": "b1", "user_id": 2, "username": "bob" }] } }
    }));
    assert!(sink.renders().is_empty());

    transport.push("room:lobby", PRESENCE_STATE, json!({
        "1": { "metas": [{ "phx_ref": "a1", "user_id": 1, "username": "alice" }] }
    }));
    assert_eq!(sink.renders().len(), 1);
    let first = sink.last_render().unwrap();
    assert!(first.contains("1"));
    assert!(first.contains("2"));

    transport.push("room:lobby", PRESENCE_DIFF, json!({
        "leaves": { "1": { "metas": [{ "phx_ref": "a1", "user_id": 1, "username": "alice" }] } }
    }));
    let latest = sink.last_render().unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest.metas("2")[0].username, "bob");
    assert_eq!(store.lock().unwrap().state().len(), 1);
}

#[test]
fn test_track_resets_store_on_rejoin() {
    let transport = MemoryTransport::new();
    let sink = RecordingSink::new();
    let store = Arc::new(Mutex::new(PresenceStore::new(sink.clone())));

    let lobby = transport.channel("room:lobby", json!({}));
    track(&lobby, store.clone());
    lobby.join().unwrap();
    transport.accept_joins();
    transport.push("room:lobby", PRESENCE_STATE, json!({
        "1": { "metas": [{ "phx_ref": "a1", "user_id": 1, "username": "alice" }] }
    }));
    assert!(store.lock().unwrap().is_synced());

    // reconnect: the socket rejoins and the server will send a new snapshot
    lobby.rejoin().unwrap();
    transport.accept_joins();
    assert!(!store.lock().unwrap().is_synced());
}

#[test]
fn test_track_ignores_malformed_payloads() {
    let transport = MemoryTransport::new();
    let sink = RecordingSink::new();
    let store = Arc::new(Mutex::new(PresenceStore::new(sink.clone())));

    let lobby = transport.channel("room:lobby", json!({}));
    track(&lobby, store.clone());
    lobby.join().unwrap();
    transport.accept_joins();

    transport.push("room:lobby", PRESENCE_STATE, json!(["not", "a", "map"]));
    transport.push("room:lobby", PRESENCE_DIFF, json!({ "joins": 42 }));
    assert!(sink.renders().is_empty());
    assert!(!store.lock().unwrap().is_synced());
}

#[test]
fn test_malformed_meta_is_skipped_not_fatal() {
    let snapshot: PresenceState = serde_json::from_value(json!({
        "1": { "metas": [{ "phx_ref": "a1", "user_id": 1, "username": "alice" }] },
        "2": { "metas": [
            { "phx_ref": "b1", "user_id": "two", "username": "bob" },
            { "phx_ref": "b2", "user_id": 2, "username": "bob" }
        ] },
        "3": { "metas": [{ "phx_ref": "c1", "username": "carol" }] }
    }))
    .unwrap();

    let state = initialize(snapshot);
    assert_eq!(state.len(), 2);
    assert_eq!(state.metas("2").len(), 1);
    assert_eq!(state.metas("2")[0].phx_ref.as_deref(), Some("b2"));
    assert!(!state.contains("3"));
}

#[test]
fn test_pending_diffs_are_capped() {
    let sink = RecordingSink::new();
    let mut store = PresenceStore::new(sink.clone());

    let total = MAX_PENDING_DIFFS + 44;
    for i in 0..total {
        let meta = Meta::new(i as u64, format!("user{i}")).with_ref(format!("r{i}"));
        assert!(store.apply_diff(Diff::join(i.to_string(), meta)).is_none());
    }
    assert_eq!(store.pending_diffs(), MAX_PENDING_DIFFS);
    assert!(sink.renders().is_empty());

    let state = store.initialize(PresenceState::new());
    assert_eq!(state.len(), MAX_PENDING_DIFFS);
    assert!(!state.contains("0"));
    assert!(!state.contains("43"));
    assert!(state.contains("44"));
    assert!(state.contains(&(total - 1).to_string()));
    assert_eq!(store.pending_diffs(), 0);
}

#[test]
fn test_track_syncs_despite_malformed_meta() {
    let transport = MemoryTransport::new();
    let sink = RecordingSink::new();
    let store = Arc::new(Mutex::new(PresenceStore::new(sink.clone())));

    let lobby = transport.channel("room:lobby", json!({}));
    track(&lobby, store.clone());
    lobby.join().unwrap();
    transport.accept_joins();

    transport.push("room:lobby", PRESENCE_STATE, json!({
        "1": { "metas": [{ "phx_ref": "a1", "user_id": "one", "username": "alice" }] },
        "2": { "metas": [{ "phx_ref": "b1", "user_id": 2, "username": "bob" }] }
    }));
    assert!(store.lock().unwrap().is_synced());
    assert_eq!(sink.renders().len(), 1);

    transport.push("room:lobby", PRESENCE_DIFF, json!({
        "joins": { "3": { "metas": [{ "phx_ref": "c1", "user_id": 3, "username": "carol" }] } }
    }));
    let latest = sink.last_render().unwrap();
    assert!(!latest.contains("1"));
    assert!(latest.contains("2"));
    assert!(latest.contains("3"));
}

/// Reads the store it renders for, as a panel that shares the store would.
#[derive(Default)]
struct StoreReadingSink {
    store: OnceLock<SharedStore>,
    seen: Mutex<Vec<Option<usize>>>,
}

impl PresentationSink for StoreReadingSink {
    fn render_presence(&self, _state: &PresenceState) {
        let len = self
            .store
            .get()
            .and_then(|store| store.try_lock().ok().map(|store| store.state().len()));
        self.seen.lock().unwrap().push(len);
    }

    fn render_notification(&self) {}
}

#[test]
fn test_sink_can_read_store_while_rendering() {
    let transport = MemoryTransport::new();
    let sink = Arc::new(StoreReadingSink::default());
    let store: SharedStore = Arc::new(Mutex::new(PresenceStore::new(sink.clone())));
    assert!(sink.store.set(store.clone()).is_ok());

    let lobby = transport.channel("room:lobby", json!({}));
    track(&lobby, store.clone());
    lobby.join().unwrap();
    transport.accept_joins();

    transport.push("room:lobby", PRESENCE_STATE, json!({
        "1": { "metas": [{ "phx_ref": "a1", "user_id": 1, "username": "alice" }] }
    }));
    transport.push("room:lobby", PRESENCE_DIFF, json!({
        "joins": { "2": { "metas": [{ "phx_ref": "b1", "user_id": 2, "username": "bob" }] } }
    }));

    assert_eq!(*sink.seen.lock().unwrap(), vec![Some(1), Some(2)]);
}
