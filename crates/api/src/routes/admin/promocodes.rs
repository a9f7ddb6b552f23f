//! Admin promocode handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use larder_core::PromocodeId;

use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::models::Promocode;
use crate::routes::PageQuery;
use crate::services::promocodes::{self, CreatePromocodeRequest};
use crate::state::AppState;

/// `GET /v1/admin/promocodes`
pub async fn index(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Promocode>>> {
    Ok(Json(
        promocodes::list(state.pool(), page.limit, page.offset).await?,
    ))
}

/// `POST /v1/admin/promocodes`
pub async fn create(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Json(request): Json<CreatePromocodeRequest>,
) -> Result<(StatusCode, Json<Promocode>)> {
    let promocode = promocodes::create(state.pool(), &request).await?;
    Ok((StatusCode::CREATED, Json(promocode)))
}

/// `POST /v1/admin/promocodes/{id}/deactivate`
pub async fn deactivate(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<PromocodeId>,
) -> Result<Json<Promocode>> {
    Ok(Json(promocodes::deactivate(state.pool(), id).await?))
}
