//! Topic subscriptions
//!
//! While a topic page is open the client holds one channel, `topic:<id>`,
//! and listens for `topic:<id>:new_reply`. Because the event name carries the
//! topic id, a notification for another topic never reaches this listener
//! even when it arrives on the same connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::render::PresentationSink;
use crate::transport::{Channel, ChannelState, ReplyStatus, Transport};

pub fn channel_topic(topic_id: &str) -> String {
    format!("topic:{topic_id}")
}

pub fn reply_event(topic_id: &str) -> String {
    format!("topic:{topic_id}:new_reply")
}

/// Whether a payload counts as present. `null`, `false`, `0` and `""` are
/// falsy; any object or array, even empty, is truthy.
pub fn is_truthy(payload: &Value) -> bool {
    match payload {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The live subscription of the current topic page.
#[derive(Debug, Clone)]
pub struct TopicSubscription {
    topic_id: String,
    channel: Channel,
}

impl TopicSubscription {
    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    /// Whether the topic channel is currently open. Turns false when the
    /// socket drops or the server errors or closes the channel, and true
    /// again once a rejoin succeeds.
    pub fn is_joined(&self) -> bool {
        self.channel.is_joined()
    }

    /// Closed for good: left, or closed by the server. Errored channels are
    /// not dead since the socket rejoins them.
    fn is_closed(&self) -> bool {
        self.channel.state() == ChannelState::Closed
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

pub struct TopicSubscriptionManager {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn PresentationSink>,
    current: Option<TopicSubscription>,
}

impl TopicSubscriptionManager {
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn PresentationSink>) -> Self {
        Self {
            transport,
            sink,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&TopicSubscription> {
        self.current.as_ref()
    }

    /// Subscribes to reply notifications of `topic_id`.
    ///
    /// A missing or blank id means the page is not a topic page and nothing
    /// happens. Subscribing to the current topic again returns the existing
    /// subscription unless its channel was closed; a different topic or a
    /// closed channel is replaced by a fresh join.
    pub fn subscribe(&mut self, topic_id: Option<&str>) -> Option<TopicSubscription> {
        let topic_id = topic_id.map(str::trim).filter(|id| !id.is_empty())?;

        if let Some(current) = &self.current {
            if current.topic_id == topic_id && !current.is_closed() {
                return Some(current.clone());
            }
        }
        self.unsubscribe();

        let channel = self.transport.channel(&channel_topic(topic_id), json!({}));
        let listening = Arc::new(AtomicBool::new(false));

        let request = match channel.join() {
            Ok(request) => request,
            Err(e) => {
                warn!(topic_id, error = %e, "unable to join topic channel");
                return None;
            }
        };

        let on_ok = {
            let weak = channel.downgrade();
            let sink = Arc::clone(&self.sink);
            let topic_id = topic_id.to_string();
            move |_: &Value| {
                info!(topic_id = %topic_id, "joined topic channel");
                // rejoins reuse the listener bound on the first join
                if listening.swap(true, Ordering::SeqCst) {
                    return;
                }
                if let Some(channel) = weak.upgrade() {
                    let sink = Arc::clone(&sink);
                    channel.on(&reply_event(&topic_id), move |payload| {
                        on_notification(sink.as_ref(), payload)
                    });
                }
            }
        };
        let on_error = {
            let topic_id = topic_id.to_string();
            move |response: &Value| {
                warn!(topic_id = %topic_id, %response, "unable to join topic channel");
            }
        };
        request
            .receive(ReplyStatus::Ok, on_ok)
            .receive(ReplyStatus::Error, on_error);

        let subscription = TopicSubscription {
            topic_id: topic_id.to_string(),
            channel,
        };
        self.current = Some(subscription.clone());
        Some(subscription)
    }

    /// Leaves the current topic channel, if any.
    pub fn unsubscribe(&mut self) -> Option<TopicSubscription> {
        let subscription = self.current.take()?;
        if let Err(e) = subscription.channel.leave() {
            debug!(topic_id = %subscription.topic_id, error = %e, "leave not sent");
        }
        Some(subscription)
    }
}

impl Drop for TopicSubscriptionManager {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Handles a reply notification for the subscribed topic.
pub fn on_notification(sink: &dyn PresentationSink, payload: &Value) {
    if is_truthy(payload) {
        sink.render_notification();
    } else {
        debug!("ignoring empty reply notification");
    }
}
