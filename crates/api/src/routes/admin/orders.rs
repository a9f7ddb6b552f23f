//! Admin order handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use larder_core::OrderId;
use tracing::info;

use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::models::{Order, OrderDetail};
use crate::services::orders::{self, ListQuery, StatusUpdate};
use crate::state::AppState;

/// `GET /v1/admin/orders`
pub async fn index(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Order>>> {
    Ok(Json(orders::list_all(state.pool(), &query).await?))
}

/// `PATCH /v1/admin/orders/{id}/status`
pub async fn set_status(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<OrderId>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<OrderDetail>> {
    info!(admin_id = %admin.id, order_id = %id, status = %update.status, "Admin order status change");
    Ok(Json(orders::set_status(state.pool(), id, update.status).await?))
}

/// `POST /v1/admin/orders/{id}/refund`
pub async fn refund(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderDetail>> {
    info!(admin_id = %admin.id, order_id = %id, "Admin refund");
    Ok(Json(orders::refund(state.pool(), state.gateway(), id).await?))
}
