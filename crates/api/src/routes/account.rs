//! Promocode checks, notification history and preferences, contact form.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

use super::PageQuery;
use crate::db::{self, notifications};
use crate::error::Result;
use crate::middleware::{OptionalUser, RequireUser};
use crate::models::{ContactMessage, NotificationLogEntry, NotificationPreferences};
use crate::services::contact::{self, ContactRequest};
use crate::services::promocodes::{self, PromocodePreview, ValidateRequest};
use crate::state::AppState;

/// `POST /v1/promocodes/validate`
pub async fn validate_promocode(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<PromocodePreview>> {
    Ok(Json(
        promocodes::preview(state.pool(), &user, &request.code).await?,
    ))
}

/// `GET /v1/notifications`
pub async fn notification_history(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<NotificationLogEntry>>> {
    let (limit, offset) = db::page(page.limit, page.offset);
    Ok(Json(
        notifications::history(state.pool(), user.id, limit, offset).await?,
    ))
}

/// `GET /v1/notifications/preferences`
pub async fn preferences(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<Json<NotificationPreferences>> {
    Ok(Json(notifications::preferences(state.pool(), user.id).await?))
}

/// `PUT /v1/notifications/preferences`
pub async fn save_preferences(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(prefs): Json<NotificationPreferences>,
) -> Result<Json<NotificationPreferences>> {
    Ok(Json(
        notifications::save_preferences(state.pool(), user.id, prefs).await?,
    ))
}

/// `POST /v1/contact-messages`
///
/// Open to anyone; a signed-in sender is linked to the message.
pub async fn contact(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Json(request): Json<ContactRequest>,
) -> Result<(StatusCode, Json<ContactMessage>)> {
    let message = contact::submit(state.pool(), user.as_ref(), &request).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
