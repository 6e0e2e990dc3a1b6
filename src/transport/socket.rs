//! Socket
//!
//! `Socket` owns one WebSocket connection to the channel server and
//! multiplexes every [`Channel`] created from it. The connection runs in a
//! background task that:
//! - connects to `<url>/websocket?vsn=2.0.0&<params>`
//! - forwards queued outbound frames to the server
//! - routes inbound frames to channels by topic
//! - sends a heartbeat every interval and drops the connection when the
//!   previous heartbeat was never answered
//! - reconnects with backoff and rejoins every channel that wants to be joined
//!
//! Frames queued while disconnected are discarded on reconnect; rejoining
//! replaces any join that was pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use url::Url;

use super::Transport;
use super::channel::{Channel, Outbound};
use super::frame::{Frame, PHOENIX_TOPIC};
use crate::config::SocketSettings;
use crate::utils::Result;

/// Backoff between reconnect attempts; later attempts use the configured cap.
const RECONNECT_SCHEDULE_MS: [u64; 9] = [10, 50, 100, 150, 200, 250, 500, 1000, 2000];

pub const PROTOCOL_VERSION: &str = "2.0.0";

#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Connection params appended to the endpoint query, e.g. the user token.
    pub params: Vec<(String, String)>,
    pub heartbeat_interval: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_max_delay: Duration::from_secs(5),
        }
    }
}

impl From<&SocketSettings> for SocketOptions {
    fn from(settings: &SocketSettings) -> Self {
        let mut params = Vec::new();
        if !settings.token.is_empty() {
            params.push(("token".to_string(), settings.token.clone()));
        }
        Self {
            params,
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            reconnect_max_delay: Duration::from_millis(settings.reconnect_max_delay_ms),
        }
    }
}

pub fn reconnect_delay(attempt: usize, max: Duration) -> Duration {
    RECONNECT_SCHEDULE_MS
        .get(attempt)
        .map(|ms| Duration::from_millis(*ms))
        .unwrap_or(max)
        .min(max)
}

/// Builds the WebSocket endpoint from the socket mount point.
pub fn endpoint_url(base: &str, params: &[(String, String)]) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let path = format!("{}/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
        query.append_pair("vsn", PROTOCOL_VERSION);
    }
    Ok(url)
}

#[derive(Default)]
struct Shared {
    channels: Mutex<Vec<Channel>>,
    connected: AtomicBool,
}

impl Shared {
    fn lock_channels(&self) -> MutexGuard<'_, Vec<Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels(&self) -> Vec<Channel> {
        self.lock_channels().clone()
    }

    fn route(&self, frame: &Frame) {
        let targets = self
            .lock_channels()
            .iter()
            .filter(|channel| channel.topic() == frame.topic)
            .cloned()
            .collect::<Vec<_>>();

        if targets.is_empty() {
            debug!(topic = %frame.topic, event = %frame.event, "no channel for frame");
        }
        for channel in targets {
            channel.trigger(frame);
        }
    }
}

pub struct Socket {
    endpoint: Url,
    options: SocketOptions,
    outbound: Outbound,
    shared: Arc<Shared>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Socket {
    pub fn new(url: &str, options: SocketOptions) -> Result<Self> {
        let endpoint = endpoint_url(url, &options.params)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            endpoint,
            options,
            outbound: Outbound::new(tx),
            shared: Arc::new(Shared::default()),
            receiver: Mutex::new(Some(rx)),
            shutdown,
            task: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.shared.channels()
    }

    /// Starts the connection task. Must run inside a Tokio runtime. Calling it
    /// again is a no-op.
    pub fn connect(&self) {
        let Some(receiver) = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            debug!(endpoint = %self.endpoint, "socket already started");
            return;
        };

        let handle = tokio::spawn(run(
            self.endpoint.clone(),
            self.options.clone(),
            self.outbound.clone(),
            Arc::clone(&self.shared),
            receiver,
            self.shutdown.subscribe(),
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Closes the connection and stops reconnecting. Joined channels end up
    /// errored.
    pub async fn disconnect(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Transport for Socket {
    fn channel(&self, topic: &str, params: Value) -> Channel {
        let channel = Channel::new(topic, params, self.outbound.clone());
        let mut channels = self.shared.lock_channels();
        channels.retain(|c| !c.is_retired());
        channels.push(channel.clone());
        channel
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("endpoint", &self.endpoint.as_str())
            .field("connected", &self.is_connected())
            .finish()
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run(
    endpoint: Url,
    options: SocketOptions,
    outbound: Outbound,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt = 0usize;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let connected = tokio::select! {
            result = connect_async(endpoint.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((stream, _response)) => {
                attempt = 0;
                info!(endpoint = %endpoint, "socket connected");
                shared.connected.store(true, Ordering::SeqCst);

                while outbound_rx.try_recv().is_ok() {}
                for channel in shared.channels() {
                    if let Err(e) = channel.rejoin() {
                        warn!(topic = %channel.topic(), error = %e, "rejoin failed");
                    }
                }

                let end = session(
                    stream,
                    &mut outbound_rx,
                    &shared,
                    &options,
                    &outbound,
                    &mut shutdown,
                )
                .await;

                shared.connected.store(false, Ordering::SeqCst);
                for channel in shared.channels() {
                    channel.socket_closed();
                }

                match end {
                    SessionEnd::Shutdown => {
                        info!(endpoint = %endpoint, "socket closed");
                        break;
                    }
                    SessionEnd::Lost(reason) => {
                        warn!(endpoint = %endpoint, %reason, "socket connection lost");
                    }
                }
            }
            Err(e) => warn!(endpoint = %endpoint, error = %e, "socket connect failed"),
        }

        let delay = reconnect_delay(attempt, options.reconnect_max_delay);
        attempt += 1;
        debug!(?delay, attempt, "reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
}

async fn session(
    stream: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<Frame>,
    shared: &Shared,
    options: &SocketOptions,
    outbound: &Outbound,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut source) = stream.split();
    let period = options.heartbeat_interval.max(Duration::from_millis(1));
    let mut heartbeat = tokio::time::interval(period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut pending_heartbeat: Option<String> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            Some(frame) = outbound_rx.recv() => {
                let message = match frame.to_ws() {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(topic = %frame.topic, error = %e, "dropping unencodable frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(message).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }
            _ = heartbeat.tick() => {
                if pending_heartbeat.is_some() {
                    let _ = sink.close().await;
                    return SessionEnd::Lost("heartbeat timeout".to_string());
                }
                let reference = outbound.next_ref();
                let message = match Frame::heartbeat(reference.clone()).to_ws() {
                    Ok(message) => message,
                    Err(e) => return SessionEnd::Lost(e.to_string()),
                };
                if let Err(e) = sink.send(message).await {
                    return SessionEnd::Lost(e.to_string());
                }
                pending_heartbeat = Some(reference);
            }
            message = source.next() => match message {
                Some(Ok(WsMessage::Text(text))) => match Frame::decode(text.as_str()) {
                    Ok(frame) if frame.topic == PHOENIX_TOPIC => {
                        if frame.reference.is_some() && frame.reference == pending_heartbeat {
                            pending_heartbeat = None;
                        }
                    }
                    Ok(frame) => shared.route(&frame),
                    Err(e) => warn!(error = %e, "dropping undecodable frame"),
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    return SessionEnd::Lost("closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
            },
        }
    }
}
