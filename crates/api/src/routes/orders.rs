//! Quote, checkout and order history handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use larder_core::OrderId;

use crate::error::Result;
use crate::middleware::RequireUser;
use crate::models::{Order, OrderDetail};
use crate::services::checkout::{self, CheckoutRequest, Quote, QuoteRequest};
use crate::services::orders::{self, ListQuery};
use crate::state::AppState;

/// `POST /v1/orders/quote`
///
/// The body is optional; without one the cart is priced with no promocode.
pub async fn quote(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    body: Option<Json<QuoteRequest>>,
) -> Result<Json<Quote>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let quote = checkout::quote(state.pool(), &state.config().pricing, &user, &request).await?;
    Ok(Json(quote))
}

/// `POST /v1/orders/checkout`
pub async fn checkout(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderDetail>)> {
    let config = state.config();
    let order = checkout::place_order(
        state.pool(),
        &config.pricing,
        config.currency,
        state.notifier(),
        &user,
        &request,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// `GET /v1/orders`
pub async fn index(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Order>>> {
    Ok(Json(orders::list_for_user(state.pool(), &user, &query).await?))
}

/// `GET /v1/orders/{id}`
pub async fn show(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderDetail>> {
    Ok(Json(orders::get_for_user(state.pool(), &user, id).await?))
}

/// `POST /v1/orders/{id}/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderDetail>> {
    Ok(Json(orders::cancel(state.pool(), &user, id).await?))
}
