//! Catalog, search and review handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use larder_core::ReviewId;
use serde::Deserialize;

use super::PageQuery;
use crate::db::{self, products};
use crate::error::Result;
use crate::middleware::RequireUser;
use crate::models::{Product, ProductDetail, Review};
use crate::services::{catalog, reviews};
use crate::state::AppState;

/// `GET /v1/products`
pub async fn index(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Product>>> {
    let (limit, offset) = db::page(page.limit, page.offset);
    Ok(Json(products::list_active(state.pool(), limit, offset).await?))
}

/// `GET /v1/products/{slug}`
pub async fn show(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ProductDetail>> {
    let detail = catalog::product_detail(state.pool(), state.catalog(), &slug).await?;
    Ok(Json(ProductDetail::clone(&detail)))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /v1/search?q=`
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Product>>> {
    let q = catalog::validate_query(&query.q)?;
    let (limit, offset) = db::page(query.limit, query.offset);
    Ok(Json(products::search(state.pool(), q, limit, offset).await?))
}

/// `GET /v1/products/{slug}/reviews`
pub async fn reviews(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Review>>> {
    Ok(Json(
        reviews::list(state.pool(), &slug, page.limit, page.offset).await?,
    ))
}

/// `POST /v1/products/{slug}/reviews`
pub async fn create_review(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(slug): Path<String>,
    Json(request): Json<reviews::CreateReviewRequest>,
) -> Result<(StatusCode, Json<Review>)> {
    let review = reviews::create(state.pool(), state.catalog(), &user, &slug, &request).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

/// `DELETE /v1/reviews/{id}`
pub async fn delete_review(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<ReviewId>,
) -> Result<StatusCode> {
    reviews::delete_own(state.pool(), state.catalog(), &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
