//! Hub WebSocket server
//!
//! Accepts connections, registers a `Connection` per socket with the `Hub`
//! and feeds decoded frames to it. Each connection gets a send loop that
//! drains its queue into the socket; whichever side finishes first cleans
//! the connection up exactly once. Once the hub forgets a connection its
//! queue closes and the socket is closed with it.

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::protocol::Message as WsMessage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::connection::Connection;
use super::engine::Hub;
use crate::transport::Frame;
use crate::utils::Result;

/// Binds `addr` and serves until the listener fails.
pub async fn start_hub_server(addr: String, hub: Arc<Mutex<Hub>>) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, hub).await
}

/// Serves connections from an already bound listener.
pub async fn serve(listener: TcpListener, hub: Arc<Mutex<Hub>>) -> Result<()> {
    info!("hub listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "accepted tcp connection");
        spawn(handle_connection(stream, Arc::clone(&hub)));
    }
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn handle_connection(stream: TcpStream, hub: Arc<Mutex<Hub>>) {
    let mut query = None;
    let capture_query =
        |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            query = request.uri().query().map(str::to_owned);
            Ok(response)
        };

    let ws_stream = match accept_hdr_async(stream, capture_query).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "websocket handshake error");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection = Connection::new(tx, query.as_deref());
    let connection_id = connection.id.clone();
    lock(&hub).register_connection(connection);

    let cleanup_called = Arc::new(AtomicBool::new(false));
    let do_cleanup = {
        let hub = Arc::clone(&hub);
        let connection_id = connection_id.clone();
        let cleanup_called = Arc::clone(&cleanup_called);

        move || {
            if !cleanup_called.swap(true, Ordering::SeqCst) {
                lock(&hub).cleanup_connection(&connection_id);
            }
        }
    };

    {
        let connection_id = connection_id.clone();
        let do_cleanup = do_cleanup.clone();

        spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_sender.send(message).await {
                    warn!(connection = %connection_id, error = %e, "failed to send frame");
                    break;
                }
            }

            // the hub dropped this connection's queue: hang up on the client
            let _ = ws_sender.close().await;
            do_cleanup();
            debug!(connection = %connection_id, "send loop closed");
        });
    }

    while let Some(Ok(message)) = ws_receiver.next().await {
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_text() else {
            continue;
        };
        if text.is_empty() {
            continue;
        }

        match Frame::decode(text) {
            Ok(frame) => lock(&hub).handle_frame(&connection_id, frame),
            Err(e) => warn!(
                connection = %connection_id,
                error = %e,
                frame = %text.chars().take(100).collect::<String>(),
                "invalid frame"
            ),
        }
    }

    do_cleanup();
    info!(connection = %connection_id, "disconnected");
}
