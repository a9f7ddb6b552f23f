//! Subscription handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use larder_core::SubscriptionId;

use crate::db::subscriptions::SubscriptionChanges;
use crate::error::Result;
use crate::middleware::RequireUser;
use crate::models::{Subscription, SubscriptionDetail};
use crate::services::subscriptions::{
    self, CreateSubscriptionRequest, ReasonRequest, UpdateItemsRequest,
};
use crate::state::AppState;

fn reason(body: Option<Json<ReasonRequest>>) -> Option<String> {
    body.and_then(|Json(r)| r.reason)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

/// `POST /v1/subscriptions`
pub async fn create(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionDetail>)> {
    let config = state.config();
    let detail =
        subscriptions::create(state.pool(), &config.pricing, config.currency, &user, &request)
            .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// `GET /v1/subscriptions`
pub async fn index(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<Json<Vec<Subscription>>> {
    Ok(Json(subscriptions::list(state.pool(), &user).await?))
}

/// `GET /v1/subscriptions/{id}`
pub async fn show(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<SubscriptionId>,
) -> Result<Json<SubscriptionDetail>> {
    let detail = subscriptions::get(state.pool(), &state.config().pricing, &user, id).await?;
    Ok(Json(detail))
}

/// `PATCH /v1/subscriptions/{id}`
pub async fn update(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<SubscriptionId>,
    Json(changes): Json<SubscriptionChanges>,
) -> Result<Json<SubscriptionDetail>> {
    let detail =
        subscriptions::update_details(state.pool(), &state.config().pricing, &user, id, &changes)
            .await?;
    Ok(Json(detail))
}

/// `PUT /v1/subscriptions/{id}/items`
pub async fn replace_items(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<SubscriptionId>,
    Json(request): Json<UpdateItemsRequest>,
) -> Result<Json<SubscriptionDetail>> {
    let detail =
        subscriptions::update_items(state.pool(), &state.config().pricing, &user, id, &request)
            .await?;
    Ok(Json(detail))
}

/// `POST /v1/subscriptions/{id}/pause`
pub async fn pause(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<SubscriptionId>,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<SubscriptionDetail>> {
    let reason = reason(body);
    let detail = subscriptions::pause(
        state.pool(),
        &state.config().pricing,
        &user,
        id,
        reason.as_deref(),
    )
    .await?;
    Ok(Json(detail))
}

/// `POST /v1/subscriptions/{id}/resume`
pub async fn resume(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<SubscriptionId>,
) -> Result<Json<SubscriptionDetail>> {
    let detail = subscriptions::resume(state.pool(), &state.config().pricing, &user, id).await?;
    Ok(Json(detail))
}

/// `POST /v1/subscriptions/{id}/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<SubscriptionId>,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<SubscriptionDetail>> {
    let reason = reason(body);
    let detail = subscriptions::cancel(
        state.pool(),
        &state.config().pricing,
        &user,
        id,
        reason.as_deref(),
    )
    .await?;
    Ok(Json(detail))
}
