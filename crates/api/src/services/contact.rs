//! Contact messages.

use larder_core::{ContactMessageId, ContactMessageStatus, Email};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::db::{self, contact_messages};
use crate::error::AppError;
use crate::models::{ContactMessage, User};

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub body: String,
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    let len = value.trim().chars().count();
    if len == 0 || len > max {
        return Err(AppError::Validation(format!(
            "{field} must be between 1 and {max} characters"
        )));
    }
    Ok(())
}

impl ContactRequest {
    fn validate(&self) -> Result<Email, AppError> {
        check_length("name", &self.name, 100)?;
        check_length("subject", &self.subject, 200)?;
        check_length("body", &self.body, 5000)?;
        Email::parse(&self.email).map_err(|e| AppError::Validation(e.to_string()))
    }
}

/// Store a message from the contact form.
///
/// # Errors
///
/// Returns `AppError::Validation` for missing or over-long fields.
#[instrument(skip(pool, user, request))]
pub async fn submit(
    pool: &PgPool,
    user: Option<&User>,
    request: &ContactRequest,
) -> Result<ContactMessage, AppError> {
    let email = request.validate()?;
    let message = contact_messages::create(
        pool,
        contact_messages::NewContactMessage {
            user_id: user.map(|u| u.id),
            name: request.name.trim(),
            email: &email,
            subject: request.subject.trim(),
            body: request.body.trim(),
        },
    )
    .await?;
    info!(message_id = %message.id, "Contact message received");
    Ok(message)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<ContactMessageStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Messages for the support inbox, newest first.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn list(pool: &PgPool, query: &ListQuery) -> Result<Vec<ContactMessage>, AppError> {
    let (limit, offset) = db::page(query.limit, query.offset);
    Ok(contact_messages::list(pool, query.status, limit, offset).await?)
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: ContactMessageStatus,
}

/// Mark a message read, replied or archived.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the message does not exist.
pub async fn set_status(
    pool: &PgPool,
    id: ContactMessageId,
    status: ContactMessageStatus,
) -> Result<ContactMessage, AppError> {
    Ok(contact_messages::set_status(pool, id, status).await?)
}
