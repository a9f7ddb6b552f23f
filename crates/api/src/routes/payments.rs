//! Payment intent creation and the gateway webhook.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use crate::error::Result;
use crate::middleware::RequireUser;
use crate::services::orders::{self, CreateIntentRequest, IntentResponse};
use crate::services::payments::webhook::{self, WebhookError};
use crate::state::AppState;

/// Header carrying `t=<unix>,v1=<hex hmac>`.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// `POST /v1/payments/intents`
pub async fn create_intent(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(request): Json<CreateIntentRequest>,
) -> Result<(StatusCode, Json<IntentResponse>)> {
    let intent = orders::create_intent(state.pool(), state.gateway(), &user, request.order_id).await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

/// `POST /v1/payments/webhook`
///
/// Takes the raw body: the signature covers the exact bytes sent.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;
    webhook::verify_signature(
        &state.config().stripe.webhook_secret,
        signature,
        &body,
        Utc::now().timestamp(),
    )?;

    let event = webhook::parse_event(&body)?;
    let event_id = event.id.clone();
    let outcome = webhook::handle_event(&state, event).await?;
    info!(event_id = %event_id, ?outcome, "Webhook handled");
    Ok(Json(json!({ "received": true, "outcome": outcome })))
}

