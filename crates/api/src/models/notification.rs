//! Notification preferences and delivery log.

use chrono::{DateTime, Utc};
use larder_core::{DeliveryStatus, NotificationId, NotificationKind, PreferenceFlag, UserId};
use serde::{Deserialize, Serialize};

/// Per-user opt-outs. Users without a row get the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationPreferences {
    pub order_updates: bool,
    pub subscription_reminders: bool,
    pub marketing: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            order_updates: true,
            subscription_reminders: true,
            marketing: false,
        }
    }
}

impl NotificationPreferences {
    /// Whether the user wants notifications of this kind.
    #[must_use]
    pub const fn allows(&self, kind: NotificationKind) -> bool {
        match kind.preference() {
            PreferenceFlag::OrderUpdates => self.order_updates,
            PreferenceFlag::SubscriptionReminders => self.subscription_reminders,
            PreferenceFlag::Marketing => self.marketing,
        }
    }
}

/// One notification attempt.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct NotificationLogEntry {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub status: DeliveryStatus,
    pub subject: String,
    pub reference: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
