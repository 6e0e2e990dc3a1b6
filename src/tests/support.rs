//! Test doubles shared by the module tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::presence::PresenceState;
use crate::render::PresentationSink;
use crate::transport::{Channel, Frame, Outbound, ReplyStatus, Transport};

/// Records every render call.
#[derive(Debug, Default)]
pub struct RecordingSink {
    renders: Mutex<Vec<PresenceState>>,
    notifications: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn renders(&self) -> Vec<PresenceState> {
        self.renders.lock().unwrap().clone()
    }

    pub fn last_render(&self) -> Option<PresenceState> {
        self.renders.lock().unwrap().last().cloned()
    }

    pub fn notifications(&self) -> usize {
        self.notifications.load(Ordering::SeqCst)
    }
}

impl PresentationSink for RecordingSink {
    fn render_presence(&self, state: &PresenceState) {
        self.renders.lock().unwrap().push(state.clone());
    }

    fn render_notification(&self) {
        self.notifications.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory transport: outbound frames are captured, inbound frames are
/// handed to channels by topic.
pub struct MemoryTransport {
    outbound: Outbound,
    receiver: Mutex<mpsc::UnboundedReceiver<Frame>>,
    log: Mutex<Vec<Frame>>,
    answered: Mutex<usize>,
    channels: Mutex<Vec<Channel>>,
    opened: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            outbound: Outbound::new(tx),
            receiver: Mutex::new(rx),
            log: Mutex::new(Vec::new()),
            answered: Mutex::new(0),
            channels: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        })
    }

    /// Every frame sent so far, oldest first.
    pub fn sent(&self) -> Vec<Frame> {
        let mut receiver = self.receiver.lock().unwrap();
        let mut log = self.log.lock().unwrap();
        while let Ok(frame) = receiver.try_recv() {
            log.push(frame);
        }
        log.clone()
    }

    /// Topics of every channel opened so far.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn deliver(&self, frame: Frame) {
        let targets = self
            .channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.topic() == frame.topic)
            .cloned()
            .collect::<Vec<_>>();
        for channel in targets {
            channel.trigger(&frame);
        }
    }

    /// Answers every `phx_join` sent since the previous call with `status`.
    pub fn answer_joins(&self, status: ReplyStatus, response: Value) {
        let sent = self.sent();
        let unanswered = {
            let mut answered = self.answered.lock().unwrap();
            let start = *answered;
            *answered = sent.len();
            sent[start..].to_vec()
        };
        for frame in unanswered {
            if frame.event == "phx_join" {
                self.deliver(frame.reply(status, response.clone()));
            }
        }
    }

    pub fn accept_joins(&self) {
        self.answer_joins(ReplyStatus::Ok, json!({}));
    }

    /// A server push on `topic`, addressed like a broadcast.
    pub fn push(&self, topic: &str, event: &str, payload: Value) {
        self.deliver(Frame::new(topic, event, payload));
    }
}

impl Transport for MemoryTransport {
    fn channel(&self, topic: &str, params: Value) -> Channel {
        let channel = Channel::new(topic, params, self.outbound.clone());
        self.channels.lock().unwrap().push(channel.clone());
        self.opened.lock().unwrap().push(topic.to_string());
        channel
    }
}
