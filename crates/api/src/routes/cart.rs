//! Cart handlers. Every response carries a preview breakdown.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use larder_core::VariantId;

use crate::error::Result;
use crate::middleware::RequireUser;
use crate::models::CartView;
use crate::services::cart::{self, SetItemRequest};
use crate::state::AppState;

/// `GET /v1/cart`
pub async fn show(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<Json<CartView>> {
    Ok(Json(cart::view(state.pool(), &state.config().pricing, &user).await?))
}

/// `PUT /v1/cart/items`
pub async fn set_item(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(request): Json<SetItemRequest>,
) -> Result<Json<CartView>> {
    let view = cart::set_item(state.pool(), &state.config().pricing, &user, &request).await?;
    Ok(Json(view))
}

/// `DELETE /v1/cart/items/{variant_id}`
pub async fn remove_item(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(variant_id): Path<VariantId>,
) -> Result<Json<CartView>> {
    let view = cart::remove_item(state.pool(), &state.config().pricing, &user, variant_id).await?;
    Ok(Json(view))
}

/// `DELETE /v1/cart`
pub async fn clear(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<StatusCode> {
    cart::clear(state.pool(), &user).await?;
    Ok(StatusCode::NO_CONTENT)
}
