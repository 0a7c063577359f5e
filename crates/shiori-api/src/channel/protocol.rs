//! JSON frame shapes spoken over the notification channel.

use serde::{Deserialize, Serialize};

use shiori_core::models::RawNotification;

/// Frames the client sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake. The server rejects the connection if the token is invalid.
    Connect { user_id: String, token: String },
    Subscribe { topic: String },
    /// Outbound payload toward a named destination.
    Send {
        destination: String,
        payload: serde_json::Value,
    },
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected,
    /// Control acknowledgement for a subscribe. Never forwarded to the
    /// dispatcher.
    SubscriptionConfirmed { topic: Option<String> },
    Notification { notification: RawNotification },
    UnreadCount { count: u32 },
    Ping,
}

/// The topic set for one user. Rebuilt and re-sent on every successful
/// (re)connect — the server does not keep subscriptions across connections.
pub fn topics_for_user(user_id: &str) -> Vec<String> {
    vec![
        "notifications".to_string(),
        format!("user.{user_id}.notifications"),
        "broadcast".to_string(),
        format!("user.{user_id}.unread-count"),
    ]
}
