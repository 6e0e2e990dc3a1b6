use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub socket: SocketSettings,
    pub presence: PresenceSettings,
    pub log: LogSettings,
}

/// Where the development hub binds.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Client-side socket settings.
///
/// `url` is the socket mount point (without the `/websocket` suffix); the
/// token is sent as a connection param.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SocketSettings {
    pub url: String,
    pub token: String,
    pub heartbeat_interval_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PresenceSettings {
    pub lobby_topic: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub socket: Option<PartialSocketSettings>,
    pub presence: Option<PartialPresenceSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialSocketSettings {
    pub url: Option<String>,
    pub token: Option<String>,
    pub heartbeat_interval_ms: Option<u64>,
    pub reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPresenceSettings {
    pub lobby_topic: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 4000,
            },
            socket: SocketSettings {
                url: "ws://127.0.0.1:4000/socket".to_string(),
                token: String::new(),
                heartbeat_interval_ms: 30_000,
                reconnect_max_delay_ms: 5_000,
            },
            presence: PresenceSettings {
                lobby_topic: "room:lobby".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Overlays whatever was provided on top of the defaults.
    pub fn merge_with(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let socket = self.socket.unwrap_or_default();
        let presence = self.presence.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            socket: SocketSettings {
                url: socket.url.unwrap_or(default.socket.url),
                token: socket.token.unwrap_or(default.socket.token),
                heartbeat_interval_ms: socket
                    .heartbeat_interval_ms
                    .unwrap_or(default.socket.heartbeat_interval_ms),
                reconnect_max_delay_ms: socket
                    .reconnect_max_delay_ms
                    .unwrap_or(default.socket.reconnect_max_delay_ms),
            },
            presence: PresenceSettings {
                lobby_topic: presence
                    .lobby_topic
                    .unwrap_or(default.presence.lobby_topic),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}
