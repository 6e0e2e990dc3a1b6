//! Per-topic "new reply" notifications.

pub mod manager;

pub use manager::{
    TopicSubscription, TopicSubscriptionManager, channel_topic, is_truthy, on_notification,
    reply_event,
};
