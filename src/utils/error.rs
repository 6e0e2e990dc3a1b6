//! The `error` module defines the error type used within `forumlive`.
//!
//! Errors only surface from setup paths (connecting, joining, loading
//! configuration). Channel event handlers log and swallow bad input instead of
//! returning errors, so a realtime failure never takes the caller down.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `join` was called twice on the same channel instance.
    #[error("channel '{0}' was already joined")]
    AlreadyJoined(String),

    #[error("channel '{0}' is not joined")]
    NotJoined(String),

    #[error("socket is disconnected")]
    Disconnected,
}
