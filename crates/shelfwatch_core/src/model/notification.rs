//! Notification model shared by local alerts and server-issued records.
//!
//! # Invariants
//! - Remote ids are all-digit strings; local ids carry [`LOCAL_ID_PREFIX`].
//! - Origin is always derived from the id format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of temporary ids given to locally generated notifications.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Notification category. Each one is gated by its own preference flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Availability,
    HoldReady,
    DueSoon,
    /// Server-side categories without a client preference.
    #[serde(other)]
    Other,
}

impl NotificationKind {
    /// Maps the remote store's notification type names.
    pub fn from_remote(value: &str) -> Self {
        match value.trim() {
            "book_available" | "availability" => Self::Availability,
            "ready_for_pickup" | "hold_ready" => Self::HoldReady,
            "due_date_reminder" | "due_soon" => Self::DueSoon,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOrigin {
    /// Generated on this device, not yet mirrored server-side.
    Local,
    /// Issued by the notification gateway.
    Remote,
}

/// Returns whether `id` was issued by the remote store.
pub fn is_remote_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|byte| byte.is_ascii_digit())
}

pub fn origin_of(id: &str) -> NotificationOrigin {
    if is_remote_id(id) {
        NotificationOrigin::Remote
    } else {
        NotificationOrigin::Local
    }
}

/// User-visible alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Related book, by catalogue id.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Location the alert refers to, if any.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    /// Unix epoch milliseconds.
    pub created_at_ms: i64,
    /// Identity of the event a local alert was raised for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

impl Notification {
    /// Creates an unread local notification with a fresh temporary id.
    pub fn local(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        created_at_ms: i64,
    ) -> Self {
        Self {
            id: format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4()),
            kind,
            title: title.into(),
            message: message.into(),
            external_id: None,
            location: None,
            is_read: false,
            created_at_ms,
            dedup_key: None,
        }
    }

    pub fn origin(&self) -> NotificationOrigin {
        origin_of(&self.id)
    }

    pub fn is_local(&self) -> bool {
        self.origin() == NotificationOrigin::Local
    }

    /// Numeric remote id, when the notification is server-issued.
    pub fn remote_id(&self) -> Option<u64> {
        if is_remote_id(&self.id) {
            self.id.parse().ok()
        } else {
            None
        }
    }
}

/// Notification record as returned by the notification gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNotification {
    pub id: u64,
    /// Raw server type name, e.g. `ready_for_pickup`.
    pub notification_type: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub library_name: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at_ms: i64,
}

impl From<RemoteNotification> for Notification {
    fn from(value: RemoteNotification) -> Self {
        Self {
            id: value.id.to_string(),
            kind: NotificationKind::from_remote(&value.notification_type),
            title: value.title,
            message: value.message,
            external_id: value.external_id,
            location: value.library_name,
            is_read: value.read,
            created_at_ms: value.created_at_ms,
            dedup_key: None,
        }
    }
}
