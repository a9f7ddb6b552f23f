//! Admin product and variant handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use larder_core::{ProductId, VariantId};

use crate::db::products::{ProductChanges, VariantChanges};
use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::models::{Product, Variant};
use crate::services::catalog::{self, CreateProductRequest, CreateVariantRequest};
use crate::state::AppState;

/// `POST /v1/admin/products`
pub async fn create_product(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>)> {
    let product = catalog::create_product(state.pool(), state.catalog(), &request).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// `PATCH /v1/admin/products/{id}`
pub async fn update_product(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<ProductId>,
    Json(changes): Json<ProductChanges>,
) -> Result<Json<Product>> {
    let product = catalog::update_product(state.pool(), state.catalog(), id, &changes).await?;
    Ok(Json(product))
}

/// `POST /v1/admin/products/{id}/variants`
pub async fn create_variant(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<ProductId>,
    Json(request): Json<CreateVariantRequest>,
) -> Result<(StatusCode, Json<Variant>)> {
    let variant = catalog::create_variant(state.pool(), state.catalog(), id, &request).await?;
    Ok((StatusCode::CREATED, Json(variant)))
}

/// `PATCH /v1/admin/variants/{id}`
pub async fn update_variant(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<VariantId>,
    Json(changes): Json<VariantChanges>,
) -> Result<Json<Variant>> {
    let variant = catalog::update_variant(state.pool(), state.catalog(), id, &changes).await?;
    Ok(Json(variant))
}
