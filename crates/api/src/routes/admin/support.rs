//! Contact inbox and review moderation.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use larder_core::{ContactMessageId, ReviewId};

use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::models::{ContactMessage, Review};
use crate::services::contact::{self, ListQuery, StatusUpdate};
use crate::services::reviews::{self, ModerationRequest};
use crate::state::AppState;

/// `GET /v1/admin/contact-messages`
pub async fn contact_messages(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ContactMessage>>> {
    Ok(Json(contact::list(state.pool(), &query).await?))
}

/// `PATCH /v1/admin/contact-messages/{id}`
pub async fn update_contact_message(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<ContactMessageId>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<ContactMessage>> {
    Ok(Json(contact::set_status(state.pool(), id, update.status).await?))
}

/// `PATCH /v1/admin/reviews/{id}`
pub async fn moderate_review(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<ReviewId>,
    Json(request): Json<ModerationRequest>,
) -> Result<Json<Review>> {
    tracing::info!(admin_id = %admin.id, review_id = %id, "Review moderation");
    let review = reviews::set_published(state.pool(), state.catalog(), id, request.is_published).await?;
    Ok(Json(review))
}
