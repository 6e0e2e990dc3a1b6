//! Hub-side representation of a connected socket.
//!
//! `Connection` holds the sending side of a per-connection channel used by
//! the hub to push frames, and the identity the client declared when it
//! connected.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use url::form_urlencoded;
use uuid::Uuid;

pub type ConnectionId = String;

/// Who is on the other end. Taken from the connect query string as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubUser {
    /// Presence key. The user id when one was given, else the connection id.
    pub identity: String,
    pub user_id: u64,
    pub username: String,
}

impl HubUser {
    /// Reads `user_id` and `username` from a query string such as
    /// `user_id=1&username=alice&vsn=2.0.0`.
    pub fn from_query(query: Option<&str>, connection_id: &str) -> Self {
        let mut user_id = None;
        let mut username = None;
        for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "user_id" => user_id = value.parse::<u64>().ok(),
                "username" => username = Some(value.into_owned()),
                _ => {}
            }
        }

        Self {
            identity: user_id.map_or_else(|| connection_id.to_string(), |id| id.to_string()),
            user_id: user_id.unwrap_or_default(),
            username: username.unwrap_or_else(|| "anonymous".to_string()),
        }
    }
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub sender: UnboundedSender<WsMessage>,
    pub user: HubUser,
}

impl Connection {
    /// Creates a connection with a fresh UUID and the identity parsed from
    /// the connect query.
    pub fn new(sender: UnboundedSender<WsMessage>, query: Option<&str>) -> Self {
        let id = Uuid::new_v4().to_string();
        let user = HubUser::from_query(query, &id);
        Self { id, sender, user }
    }
}
