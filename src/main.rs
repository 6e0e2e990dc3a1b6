//! CLI for forumlive
//!
//! Subcommands:
//! - `hub`: run the development channel server
//! - `watch`: follow who is online and, optionally, replies to one topic

use std::sync::{Arc, Mutex};

use clap::Parser;
use forumlive::config::{Settings, load_config};
use forumlive::hub::{Hub, start_hub_server};
use forumlive::presence::{self, PresenceStore};
use forumlive::render::{LogSink, PresentationSink};
use forumlive::topic::TopicSubscriptionManager;
use forumlive::transport::{ReplyStatus, Socket, SocketOptions, Transport};
use forumlive::utils::{Result, logging};
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "forumlive")]
enum Command {
    /// Start the development hub
    Hub,
    /// Connect and log online users and topic reply notifications
    Watch {
        /// Socket mount point, e.g. ws://127.0.0.1:4000/socket
        #[arg(long)]
        url: Option<String>,
        /// User token sent as a connect param
        #[arg(long)]
        token: Option<String>,
        /// Topic id to watch for new replies
        #[arg(long)]
        topic: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    logging::init(&settings.log.level);

    let outcome = match cmd {
        Command::Hub => run_hub(&settings).await,
        Command::Watch { url, token, topic } => {
            let mut settings = settings;
            if let Some(url) = url {
                settings.socket.url = url;
            }
            if let Some(token) = token {
                settings.socket.token = token;
            }
            run_watch(&settings, topic.as_deref()).await
        }
    };

    if let Err(e) = outcome {
        error!("forumlive failed: {}", e);
    }
}

async fn run_hub(settings: &Settings) -> Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let hub = Arc::new(Mutex::new(Hub::new()));

    tokio::select! {
        result = start_hub_server(addr, hub) => {
            result?;
            error!("Hub server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_watch(settings: &Settings, topic_id: Option<&str>) -> Result<()> {
    let socket = Arc::new(Socket::new(
        &settings.socket.url,
        SocketOptions::from(&settings.socket),
    )?);
    socket.connect();

    let sink: Arc<dyn PresentationSink> = Arc::new(LogSink::new());
    let store = Arc::new(Mutex::new(PresenceStore::new(Arc::clone(&sink))));

    let lobby = socket.channel(&settings.presence.lobby_topic, json!({}));
    presence::track(&lobby, store);
    let lobby_topic = settings.presence.lobby_topic.clone();
    lobby
        .join()?
        .receive(ReplyStatus::Ok, move |_| info!(topic = %lobby_topic, "Joined successfully"))
        .receive(ReplyStatus::Error, |response| warn!(%response, "Unable to join"));

    let mut topics = TopicSubscriptionManager::new(socket.clone(), sink);
    topics.subscribe(topic_id);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");

    topics.unsubscribe();
    if let Err(e) = lobby.leave() {
        warn!(error = %e, "leave not sent");
    }
    socket.disconnect().await;
    Ok(())
}
