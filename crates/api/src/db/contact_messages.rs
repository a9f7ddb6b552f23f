//! Contact form inbox.

use larder_core::{ContactMessageId, ContactMessageStatus, Email, UserId};
use sqlx::PgPool;

use super::RepositoryError;
use crate::models::ContactMessage;

const MESSAGE_COLUMNS: &str = "id, user_id, name, email, subject, body, status, created_at, updated_at";

/// A submitted message.
#[derive(Debug, Clone)]
pub struct NewContactMessage<'a> {
    pub user_id: Option<UserId>,
    pub name: &'a str,
    pub email: &'a Email,
    pub subject: &'a str,
    pub body: &'a str,
}

/// Store a message.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn create(
    pool: &PgPool,
    new: NewContactMessage<'_>,
) -> Result<ContactMessage, RepositoryError> {
    let message = sqlx::query_as::<_, ContactMessage>(&format!(
        "INSERT INTO shop.contact_messages (user_id, name, email, subject, body) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(new.user_id)
    .bind(new.name)
    .bind(new.email)
    .bind(new.subject)
    .bind(new.body)
    .fetch_one(pool)
    .await?;
    Ok(message)
}

/// Messages, optionally filtered by status, newest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list(
    pool: &PgPool,
    status: Option<ContactMessageStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<ContactMessage>, RepositoryError> {
    let messages = sqlx::query_as::<_, ContactMessage>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM shop.contact_messages \
         WHERE ($1::shop.contact_message_status IS NULL OR status = $1) \
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(messages)
}

/// Move a message through the inbox.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the message does not exist.
pub async fn set_status(
    pool: &PgPool,
    id: ContactMessageId,
    status: ContactMessageStatus,
) -> Result<ContactMessage, RepositoryError> {
    sqlx::query_as::<_, ContactMessage>(&format!(
        "UPDATE shop.contact_messages SET status = $2, updated_at = NOW() WHERE id = $1 \
         RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(id)
    .bind(status)
    .fetch_optional(pool)
    .await?
    .ok_or(RepositoryError::NotFound)
}
