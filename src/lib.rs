//! # forumlive
//!
//! `forumlive` is the realtime layer of a forum client: it keeps an accurate
//! "who's online" view from server-pushed presence snapshots and diffs, and
//! signals when the topic being read receives a new reply.
//!
//! ## Core Modules
//!
//! - `presence`: presence data model, the snapshot/diff merge, and the store
//!   that renders after every change.
//! - `topic`: per-topic reply notification subscriptions.
//! - `render`: the presentation sink the core renders through.
//! - `transport`: the channel protocol client (frames, channels, socket).
//! - `hub`: a development channel server speaking the same protocol.
//! - `config`: loading and merging configuration.
//! - `utils`: error type and logging bootstrap.

pub mod config;
pub mod hub;
pub mod presence;
pub mod render;
pub mod topic;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
