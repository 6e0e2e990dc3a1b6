//! Presentation sink
//!
//! The core never draws anything itself. After each presence change it hands
//! the new state to a [`PresentationSink`], and a topic reply notification
//! becomes a single `render_notification` call. Implementations must tolerate
//! repeated calls: `render_presence` may receive an empty state, and a burst of
//! notifications must not stack indicators.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::presence::{PresenceState, list};

pub trait PresentationSink: Send + Sync {
    fn render_presence(&self, state: &PresenceState);

    fn render_notification(&self);
}

/// Renders into the application log.
#[derive(Debug, Default)]
pub struct LogSink {
    notification_shown: AtomicBool,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notification_visible(&self) -> bool {
        self.notification_shown.load(Ordering::SeqCst)
    }

    /// Hides the indicator so the next notification is shown again.
    pub fn dismiss_notification(&self) {
        self.notification_shown.store(false, Ordering::SeqCst);
    }
}

impl PresentationSink for LogSink {
    fn render_presence(&self, state: &PresenceState) {
        let users = list(state)
            .into_iter()
            .map(|user| user.username)
            .collect::<Vec<_>>();
        info!(online = users.len(), users = %users.join(", "), "online users");
    }

    fn render_notification(&self) {
        if !self.notification_shown.swap(true, Ordering::SeqCst) {
            info!("new replies available, reload the topic to see them");
        }
    }
}
