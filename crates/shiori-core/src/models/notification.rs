use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification category, used to pick a default icon client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
    System,
}

impl NotificationKind {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "success" => Some(Self::Success),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    /// Default icon name for this kind.
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Info => "bell",
            Self::Success => "check-circle",
            Self::Warning => "alert-triangle",
            Self::Error => "alert-octagon",
            Self::System => "settings",
        }
    }
}

/// Canonical client-side notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub action_url: Option<String>,
    /// Transient UI flag: true only for the tick on which the notification
    /// was first observed locally. Cleared on any subsequent load from the
    /// authoritative list.
    #[serde(skip)]
    pub is_new: bool,
}

impl Notification {
    pub fn mark_read(&mut self) {
        self.is_read = true;
        if self.read_at.is_none() {
            self.read_at = Some(Utc::now());
        }
    }
}

/// Loose wire shape of an inbound notification, from either the event
/// channel or a poll delta. Everything but the text is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNotification {
    pub id: Option<String>,
    pub title: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub is_read: Option<bool>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub action_url: Option<String>,
}

impl RawNotification {
    /// Normalize into the canonical shape, assigning defaults where the
    /// server omitted fields and marking the result as newly observed.
    pub fn normalize(self) -> Notification {
        let is_read = self.is_read.unwrap_or(false);
        // is_read implies read_at; backfill if the server left it out.
        let read_at = if is_read {
            self.read_at.or_else(|| Some(Utc::now()))
        } else {
            None
        };

        Notification {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            title: self.title.unwrap_or_else(|| "Notification".into()),
            message: self.message.unwrap_or_default(),
            kind: self
                .kind
                .as_deref()
                .and_then(NotificationKind::from_wire)
                .unwrap_or(NotificationKind::Info),
            is_read,
            read_at,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            action_url: self.action_url,
            is_new: true,
        }
    }
}
