//! HTTP routes.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health, /health/ready
//!
//! # Catalog (public)
//! GET  /v1/products                    GET  /v1/products/{slug}
//! GET  /v1/products/{slug}/reviews     GET  /v1/search?q=
//!
//! # Customer (bearer token)
//! POST /v1/products/{slug}/reviews     DELETE /v1/reviews/{id}
//! GET  /v1/cart   PUT /v1/cart/items   DELETE /v1/cart/items/{variant_id}   DELETE /v1/cart
//! POST /v1/orders/quote   POST /v1/orders/checkout   GET /v1/orders
//! GET  /v1/orders/{id}    POST /v1/orders/{id}/cancel
//! POST /v1/payments/intents
//! POST /v1/subscriptions  GET /v1/subscriptions  GET|PATCH /v1/subscriptions/{id}
//! PUT  /v1/subscriptions/{id}/items
//! POST /v1/subscriptions/{id}/pause|resume|cancel
//! POST /v1/promocodes/validate
//! GET  /v1/notifications  GET|PUT /v1/notifications/preferences
//!
//! # Public writes (strict rate limit)
//! POST /v1/contact-messages
//!
//! # Gateway (signature, no rate limit)
//! POST /v1/payments/webhook
//!
//! # Admin
//! /v1/admin/...   see `admin`
//! ```

pub mod account;
pub mod admin;
pub mod cart;
pub mod orders;
pub mod payments;
pub mod products;
pub mod subscriptions;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::middleware::{api_rate_limiter, request_id_middleware, strict_rate_limiter};
use crate::state::AppState;

/// `?limit=&offset=` for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Catalog and review routes.
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(products::index))
        .route("/products/{slug}", get(products::show))
        .route(
            "/products/{slug}/reviews",
            get(products::reviews).post(products::create_review),
        )
        .route("/reviews/{id}", delete(products::delete_review))
        .route("/search", get(products::search))
}

/// Cart, order and payment intent routes.
pub fn shopping_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(cart::show).delete(cart::clear))
        .route("/cart/items", put(cart::set_item))
        .route("/cart/items/{variant_id}", delete(cart::remove_item))
        .route("/orders", get(orders::index))
        .route("/orders/quote", post(orders::quote))
        .route("/orders/checkout", post(orders::checkout))
        .route("/orders/{id}", get(orders::show))
        .route("/orders/{id}/cancel", post(orders::cancel))
        .route("/payments/intents", post(payments::create_intent))
}

/// Subscription routes.
pub fn subscription_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/subscriptions",
            get(subscriptions::index).post(subscriptions::create),
        )
        .route(
            "/subscriptions/{id}",
            get(subscriptions::show).patch(subscriptions::update),
        )
        .route("/subscriptions/{id}/items", put(subscriptions::replace_items))
        .route("/subscriptions/{id}/pause", post(subscriptions::pause))
        .route("/subscriptions/{id}/resume", post(subscriptions::resume))
        .route("/subscriptions/{id}/cancel", post(subscriptions::cancel))
}

/// Notification routes.
pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(account::notification_history))
        .route(
            "/notifications/preferences",
            get(account::preferences).put(account::save_preferences),
        )
}

/// Endpoints worth guessing at: contact form and promocode checks.
pub fn guarded_routes() -> Router<AppState> {
    Router::new()
        .route("/contact-messages", post(account::contact))
        .route("/promocodes/validate", post(account::validate_promocode))
        .layer(strict_rate_limiter())
}

/// Everything under `/v1`.
pub fn routes() -> Router<AppState> {
    let limited = Router::new()
        .merge(product_routes())
        .merge(shopping_routes())
        .merge(subscription_routes())
        .merge(notification_routes())
        .nest("/admin", admin::routes())
        .layer(api_rate_limiter());

    Router::new()
        .merge(limited)
        .merge(guarded_routes())
        .route("/payments/webhook", post(payments::webhook))
}

/// The full application with health checks, tracing and Sentry.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/v1", routes())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

/// Liveness: the process is up. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness: 503 until the database answers.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
