//! User notification preferences and push permission state.

use crate::model::notification::NotificationKind;
use serde::{Deserialize, Serialize};

/// Notification preference flags.
///
/// Serialized with camelCase names to match the preference set stored by
/// clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub push_notifications: bool,
    /// Honored server-side; stored here so the preference round-trips.
    pub email_notifications: bool,
    pub availability_alerts: bool,
    pub hold_ready_alerts: bool,
    pub due_soon_alerts: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            push_notifications: true,
            email_notifications: false,
            availability_alerts: true,
            hold_ready_alerts: true,
            due_soon_alerts: true,
        }
    }
}

impl Preferences {
    /// Returns whether a notification of `kind` may be surfaced or delivered.
    pub fn allows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Availability => self.availability_alerts,
            NotificationKind::HoldReady => self.hold_ready_alerts,
            NotificationKind::DueSoon => self.due_soon_alerts,
            NotificationKind::Other => true,
        }
    }
}

/// Push delivery permission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    #[default]
    Default,
}
