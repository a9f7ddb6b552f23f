use chrono::{DateTime, Utc};
use larder_core::{ContactMessageId, ContactMessageStatus, Email, UserId};
use serde::Serialize;

/// A message sent through the public contact form.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ContactMessage {
    pub id: ContactMessageId,
    pub user_id: Option<UserId>,
    pub name: String,
    pub email: Email,
    pub subject: String,
    pub body: String,
    pub status: ContactMessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
