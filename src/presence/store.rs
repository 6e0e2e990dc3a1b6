//! Presence store
//!
//! `PresenceStore` owns the presence view of one channel. It is constructed
//! explicitly and shared by reference (usually `Arc<Mutex<PresenceStore>>`)
//! with the channel handlers that feed it.
//!
//! Diffs that arrive before the snapshot of the current join are buffered
//! and replayed, in delivery order, on top of the snapshot. Because joins are
//! deduplicated per connection and unknown leaves are ignored, replaying a
//! diff the snapshot already reflects leaves the result unchanged. The buffer
//! keeps at most [`MAX_PENDING_DIFFS`] diffs; older ones are dropped.
//!
//! [`PresenceStore::sync_state`] and [`PresenceStore::sync_diff`] update the
//! view and hand back a [`PendingRender`], so a caller holding the store's
//! lock can release it before the sink runs. The sink may then read the
//! store.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use super::state::{self, Diff, PresenceState};
use crate::render::PresentationSink;

/// Upper bound on diffs buffered while waiting for a snapshot.
pub const MAX_PENDING_DIFFS: usize = 256;

pub struct PresenceStore {
    state: Option<Arc<PresenceState>>,
    pending: VecDeque<Diff>,
    sink: Arc<dyn PresentationSink>,
}

/// A committed state that still has to be shown.
#[must_use = "the new presence state is only shown once `render` is called"]
pub struct PendingRender {
    state: Arc<PresenceState>,
    sink: Arc<dyn PresentationSink>,
}

impl PendingRender {
    pub fn state(&self) -> &Arc<PresenceState> {
        &self.state
    }

    pub fn render(self) -> Arc<PresenceState> {
        self.sink.render_presence(&self.state);
        self.state
    }
}

impl PresenceStore {
    pub fn new(sink: Arc<dyn PresentationSink>) -> Self {
        Self {
            state: None,
            pending: VecDeque::new(),
            sink,
        }
    }

    /// Overwrites the current view with `snapshot`, replays buffered diffs
    /// and renders once.
    pub fn initialize(&mut self, snapshot: PresenceState) -> Arc<PresenceState> {
        self.sync_state(snapshot).render()
    }

    /// Merges `diff` into the current view and renders.
    ///
    /// Returns `None` while no snapshot has been received; the diff is then
    /// kept for replay.
    pub fn apply_diff(&mut self, diff: Diff) -> Option<Arc<PresenceState>> {
        self.sync_diff(diff).map(PendingRender::render)
    }

    /// Like [`initialize`](Self::initialize), leaving the render to the caller.
    pub fn sync_state(&mut self, snapshot: PresenceState) -> PendingRender {
        let mut next = state::initialize(snapshot);

        let buffered = std::mem::take(&mut self.pending);
        if !buffered.is_empty() {
            debug!(
                count = buffered.len(),
                "replaying presence diffs received before snapshot"
            );
        }
        for diff in &buffered {
            next = state::apply_diff(&next, diff);
        }

        self.commit(next)
    }

    /// Like [`apply_diff`](Self::apply_diff), leaving the render to the caller.
    pub fn sync_diff(&mut self, diff: Diff) -> Option<PendingRender> {
        let Some(current) = &self.state else {
            debug!("presence diff before snapshot, buffering");
            if self.pending.len() >= MAX_PENDING_DIFFS {
                self.pending.pop_front();
                warn!(
                    limit = MAX_PENDING_DIFFS,
                    "no presence snapshot yet, dropping oldest buffered diff"
                );
            }
            self.pending.push_back(diff);
            return None;
        };

        let next = state::apply_diff(current, &diff);
        Some(self.commit(next))
    }

    /// Forgets everything. Used when the channel (re)joins and a new
    /// snapshot is on its way.
    pub fn reset(&mut self) {
        self.state = None;
        self.pending.clear();
    }

    /// The latest state; empty until a snapshot has been received.
    pub fn state(&self) -> Arc<PresenceState> {
        self.state.clone().unwrap_or_default()
    }

    pub fn is_synced(&self) -> bool {
        self.state.is_some()
    }

    pub fn pending_diffs(&self) -> usize {
        self.pending.len()
    }

    fn commit(&mut self, next: PresenceState) -> PendingRender {
        let next = Arc::new(next);
        self.state = Some(Arc::clone(&next));
        PendingRender {
            state: next,
            sink: Arc::clone(&self.sink),
        }
    }
}

impl std::fmt::Debug for PresenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceStore")
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish()
    }
}
