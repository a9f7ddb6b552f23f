//! Admin routes. Every handler takes [`RequireAdmin`](crate::middleware::RequireAdmin).

pub mod catalog;
pub mod orders;
pub mod promocodes;
pub mod renewals;
pub mod support;

use axum::{
    Router,
    routing::{get, patch, post},
};

use crate::state::AppState;

/// Routes mounted under `/v1/admin`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(orders::index))
        .route("/orders/{id}/status", patch(orders::set_status))
        .route("/orders/{id}/refund", post(orders::refund))
        .route("/products", post(catalog::create_product))
        .route("/products/{id}", patch(catalog::update_product))
        .route("/products/{id}/variants", post(catalog::create_variant))
        .route("/variants/{id}", patch(catalog::update_variant))
        .route("/promocodes", get(promocodes::index).post(promocodes::create))
        .route("/promocodes/{id}/deactivate", post(promocodes::deactivate))
        .route("/contact-messages", get(support::contact_messages))
        .route("/contact-messages/{id}", patch(support::update_contact_message))
        .route("/reviews/{id}", patch(support::moderate_review))
        .route("/subscriptions/due", get(renewals::due))
        .route("/renewals/run", post(renewals::run))
}
