//! Notification preferences and the delivery log.

use larder_core::{DeliveryStatus, NotificationKind, UserId};
use sqlx::PgPool;

use super::RepositoryError;
use crate::models::{NotificationLogEntry, NotificationPreferences};

/// A user's preferences, or the defaults if they never saved any.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn preferences(
    pool: &PgPool,
    user_id: UserId,
) -> Result<NotificationPreferences, RepositoryError> {
    let prefs = sqlx::query_as::<_, NotificationPreferences>(
        "SELECT order_updates, subscription_reminders, marketing \
         FROM shop.notification_preferences WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(prefs.unwrap_or_default())
}

/// Save a user's preferences.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the upsert fails.
pub async fn save_preferences(
    pool: &PgPool,
    user_id: UserId,
    prefs: NotificationPreferences,
) -> Result<NotificationPreferences, RepositoryError> {
    let saved = sqlx::query_as::<_, NotificationPreferences>(
        "INSERT INTO shop.notification_preferences \
             (user_id, order_updates, subscription_reminders, marketing) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (user_id) DO UPDATE SET \
             order_updates = EXCLUDED.order_updates, \
             subscription_reminders = EXCLUDED.subscription_reminders, \
             marketing = EXCLUDED.marketing, \
             updated_at = NOW() \
         RETURNING order_updates, subscription_reminders, marketing",
    )
    .bind(user_id)
    .bind(prefs.order_updates)
    .bind(prefs.subscription_reminders)
    .bind(prefs.marketing)
    .fetch_one(pool)
    .await?;
    Ok(saved)
}

/// One delivery attempt to log.
#[derive(Debug, Clone)]
pub struct NewLogEntry<'a> {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub status: DeliveryStatus,
    pub subject: &'a str,
    pub reference: Option<&'a str>,
    pub error: Option<&'a str>,
}

/// Append to the delivery log.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn log(pool: &PgPool, entry: NewLogEntry<'_>) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO shop.notification_log (user_id, kind, status, subject, reference, error) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(entry.user_id)
    .bind(entry.kind)
    .bind(entry.status)
    .bind(entry.subject)
    .bind(entry.reference)
    .bind(entry.error)
    .execute(pool)
    .await?;
    Ok(())
}

/// A user's recent notifications, newest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn history(
    pool: &PgPool,
    user_id: UserId,
    limit: i64,
    offset: i64,
) -> Result<Vec<NotificationLogEntry>, RepositoryError> {
    let entries = sqlx::query_as::<_, NotificationLogEntry>(
        "SELECT id, user_id, kind, status, subject, reference, error, created_at \
         FROM shop.notification_log WHERE user_id = $1 \
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}
