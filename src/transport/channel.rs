//! Channels
//!
//! A [`Channel`] is a joinable, topic-addressed scope on a connection. Its
//! handle is cheap to clone; every clone drives the same channel. Inbound
//! frames reach it through [`Channel::trigger`] (called by the socket reader)
//! and outbound frames leave through the shared [`Outbound`] queue, so the
//! channel itself never performs I/O.
//!
//! Callbacks run without the channel lock held. A callback may call back into
//! the channel, for example to bind a listener from a join hook.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::frame::{Frame, PHX_CLOSE, PHX_ERROR, PHX_JOIN, PHX_LEAVE, PHX_REPLY, Reply, ReplyStatus};
use crate::utils::{Error, Result};

type SharedCallback = Arc<Mutex<Box<dyn FnMut(&Value) + Send>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Joining,
    Joined,
    Errored,
}

/// Identifies one listener registered with [`Channel::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingRef(u64);

/// Queue into the connection's writer, plus the ref counter its frames share.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: UnboundedSender<Frame>,
    refs: Arc<AtomicU64>,
}

impl Outbound {
    pub fn new(tx: UnboundedSender<Frame>) -> Self {
        Self {
            tx,
            refs: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn next_ref(&self) -> String {
        (self.refs.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub fn send(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).map_err(|_| Error::Disconnected)
    }
}

struct Binding {
    id: u64,
    event: String,
    callback: SharedCallback,
}

struct JoinHook {
    status: ReplyStatus,
    callback: SharedCallback,
}

struct Inner {
    topic: String,
    params: Value,
    state: ChannelState,
    join_ref: Option<String>,
    bindings: Vec<Binding>,
    next_binding: u64,
    join_hooks: Vec<JoinHook>,
    last_reply: Option<(String, Reply)>,
}

#[derive(Clone)]
pub struct Channel {
    inner: Arc<Mutex<Inner>>,
    outbound: Outbound,
}

/// Non-owning handle, for callbacks stored inside the channel they refer to.
#[derive(Clone)]
pub struct WeakChannel {
    inner: Weak<Mutex<Inner>>,
    outbound: Outbound,
}

impl WeakChannel {
    pub fn upgrade(&self) -> Option<Channel> {
        self.inner.upgrade().map(|inner| Channel {
            inner,
            outbound: self.outbound.clone(),
        })
    }
}

/// Returned by [`Channel::join`]; collects reply hooks.
pub struct JoinRequest {
    channel: Channel,
}

impl JoinRequest {
    /// Runs `callback` with the reply's response whenever a join attempt of
    /// this channel is answered with `status`, including rejoins after a
    /// reconnect. If the current attempt was already answered, the callback
    /// runs immediately.
    pub fn receive<F>(self, status: ReplyStatus, callback: F) -> Self
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.channel.add_join_hook(status, callback, true);
        self
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

impl Channel {
    pub fn new(topic: impl Into<String>, params: Value, outbound: Outbound) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                topic: topic.into(),
                params,
                state: ChannelState::Closed,
                join_ref: None,
                bindings: Vec::new(),
                next_binding: 0,
                join_hooks: Vec::new(),
                last_reply: None,
            })),
            outbound,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn topic(&self) -> String {
        self.lock().topic.clone()
    }

    pub fn state(&self) -> ChannelState {
        self.lock().state
    }

    pub fn is_joined(&self) -> bool {
        self.state() == ChannelState::Joined
    }

    pub fn join_ref(&self) -> Option<String> {
        self.lock().join_ref.clone()
    }

    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            inner: Arc::downgrade(&self.inner),
            outbound: self.outbound.clone(),
        }
    }

    /// Sends `phx_join`. A channel instance joins once; leave it and open a
    /// new one to join again.
    pub fn join(&self) -> Result<JoinRequest> {
        {
            let inner = self.lock();
            if matches!(inner.state, ChannelState::Joining | ChannelState::Joined) {
                return Err(Error::AlreadyJoined(inner.topic.clone()));
            }
        }
        self.send_join()?;
        Ok(JoinRequest {
            channel: self.clone(),
        })
    }

    /// Registers a hook fired each time a join attempt succeeds. Unlike
    /// [`JoinRequest::receive`] it does not fire for a reply that already
    /// arrived.
    pub fn on_joined<F>(&self, callback: F)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.add_join_hook(ReplyStatus::Ok, callback, false);
    }

    /// Listens for `event` on this channel.
    pub fn on<F>(&self, event: &str, callback: F) -> BindingRef
    where
        F: FnMut(&Value) + Send + 'static,
    {
        let mut inner = self.lock();
        inner.next_binding += 1;
        let id = inner.next_binding;
        inner.bindings.push(Binding {
            id,
            event: event.to_string(),
            callback: Arc::new(Mutex::new(Box::new(callback))),
        });
        BindingRef(id)
    }

    pub fn off(&self, binding: BindingRef) {
        self.lock().bindings.retain(|b| b.id != binding.0);
    }

    /// Sends a client event on a joined channel. Returns the push ref.
    pub fn push(&self, event: &str, payload: Value) -> Result<String> {
        let frame = {
            let inner = self.lock();
            if inner.state != ChannelState::Joined {
                return Err(Error::NotJoined(inner.topic.clone()));
            }
            let reference = self.outbound.next_ref();
            Frame::new(inner.topic.clone(), event, payload)
                .with_refs(inner.join_ref.clone(), Some(reference))
        };
        let reference = frame.reference.clone().unwrap_or_default();
        self.outbound.send(frame)?;
        Ok(reference)
    }

    /// Leaves the channel. Listeners and hooks are dropped and no further
    /// events are delivered, whether or not the server sees the leave.
    pub fn leave(&self) -> Result<()> {
        let frame = {
            let mut inner = self.lock();
            let was_active = matches!(
                inner.state,
                ChannelState::Joining | ChannelState::Joined | ChannelState::Errored
            );
            let frame = was_active.then(|| {
                Frame::new(inner.topic.clone(), PHX_LEAVE, json!({}))
                    .with_refs(inner.join_ref.clone(), Some(self.outbound.next_ref()))
            });
            inner.state = ChannelState::Closed;
            inner.bindings.clear();
            inner.join_hooks.clear();
            frame
        };
        match frame {
            Some(frame) => self.outbound.send(frame),
            None => Ok(()),
        }
    }

    /// Delivers an inbound frame addressed to this channel's topic.
    pub fn trigger(&self, frame: &Frame) {
        let mut inner = self.lock();
        if frame.topic != inner.topic {
            return;
        }

        if frame.event == PHX_REPLY
            && frame.reference.is_some()
            && frame.reference == inner.join_ref
        {
            let Some(reply) = frame.as_reply() else {
                warn!(topic = %inner.topic, "malformed join reply");
                return;
            };
            if inner.state != ChannelState::Joining {
                debug!(topic = %inner.topic, "ignoring late join reply");
                return;
            }
            inner.state = match reply.status {
                ReplyStatus::Ok => ChannelState::Joined,
                ReplyStatus::Error | ReplyStatus::Timeout => ChannelState::Errored,
            };
            debug!(topic = %inner.topic, status = ?reply.status, "join reply");

            let hooks = inner
                .join_hooks
                .iter()
                .filter(|hook| hook.status == reply.status)
                .map(|hook| Arc::clone(&hook.callback))
                .collect::<Vec<_>>();
            let join_ref = inner.join_ref.clone().unwrap_or_default();
            inner.last_reply = Some((join_ref, reply.clone()));
            drop(inner);

            for hook in hooks {
                invoke(&hook, &reply.response);
            }
            return;
        }

        if let Some(join_ref) = &frame.join_ref {
            if inner.join_ref.as_ref() != Some(join_ref) {
                debug!(topic = %inner.topic, event = %frame.event, "dropping frame for stale join");
                return;
            }
        }

        if inner.state == ChannelState::Closed {
            return;
        }
        match frame.event.as_str() {
            PHX_CLOSE => inner.state = ChannelState::Closed,
            PHX_ERROR => inner.state = ChannelState::Errored,
            _ => {}
        }

        let callbacks = inner
            .bindings
            .iter()
            .filter(|b| b.event == frame.event)
            .map(|b| Arc::clone(&b.callback))
            .collect::<Vec<_>>();
        drop(inner);

        for callback in callbacks {
            invoke(&callback, &frame.payload);
        }
    }

    /// Sends a fresh join if the channel wants to be joined.
    pub(crate) fn rejoin(&self) -> Result<()> {
        if matches!(
            self.state(),
            ChannelState::Joining | ChannelState::Joined | ChannelState::Errored
        ) {
            self.send_join()?;
        }
        Ok(())
    }

    /// The connection dropped: joined channels become errored and their
    /// `phx_error` listeners run.
    pub(crate) fn socket_closed(&self) {
        let should_notify = {
            let mut inner = self.lock();
            let active = matches!(inner.state, ChannelState::Joining | ChannelState::Joined);
            if active {
                inner.state = ChannelState::Errored;
            }
            active
        };
        if should_notify {
            let topic = self.topic();
            let frame = Frame::new(topic, PHX_ERROR, json!({ "reason": "socket closed" }));
            self.trigger(&frame);
        }
    }

    /// Joined at some point and closed since; nothing will revive it.
    pub(crate) fn is_retired(&self) -> bool {
        let inner = self.lock();
        inner.state == ChannelState::Closed && inner.join_ref.is_some()
    }

    fn send_join(&self) -> Result<()> {
        let frame = {
            let mut inner = self.lock();
            let join_ref = self.outbound.next_ref();
            inner.join_ref = Some(join_ref.clone());
            inner.state = ChannelState::Joining;
            Frame::new(inner.topic.clone(), PHX_JOIN, inner.params.clone())
                .with_refs(Some(join_ref.clone()), Some(join_ref))
        };
        self.outbound.send(frame)
    }

    fn add_join_hook<F>(&self, status: ReplyStatus, callback: F, replay: bool)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        let callback: SharedCallback = Arc::new(Mutex::new(Box::new(callback)));
        let answered = {
            let mut inner = self.lock();
            inner.join_hooks.push(JoinHook {
                status,
                callback: Arc::clone(&callback),
            });
            match &inner.last_reply {
                Some((join_ref, reply))
                    if replay
                        && reply.status == status
                        && inner.join_ref.as_ref() == Some(join_ref) =>
                {
                    Some(reply.response.clone())
                }
                _ => None,
            }
        };
        if let Some(response) = answered {
            invoke(&callback, &response);
        }
    }
}

fn invoke(callback: &SharedCallback, payload: &Value) {
    let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
    (*callback)(payload);
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Channel")
            .field("topic", &inner.topic)
            .field("state", &inner.state)
            .field("join_ref", &inner.join_ref)
            .field("bindings", &inner.bindings.len())
            .finish()
    }
}
