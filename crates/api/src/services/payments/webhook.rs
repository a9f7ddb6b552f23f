//! Gateway webhook verification and event handling.
//!
//! The `Stripe-Signature` header looks like `t=1700000000,v1=<hex>,v1=<hex>`.
//! Each `v1` entry is an HMAC-SHA256 of `"{t}.{body}"` keyed with the webhook
//! secret; any one matching entry within the tolerance window is accepted.

use hmac::{Hmac, Mac};
use larder_core::OrderId;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::db::{orders, payments};
use crate::error::AppError;
use crate::services::notifications::Notice;
use crate::state::AppState;

/// Maximum age of a signed payload.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

/// Errors from verifying or reading a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("malformed signature header: {0}")]
    MalformedHeader(String),

    #[error("signature timestamp outside tolerance")]
    Expired,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("invalid payload: {0}")]
    Payload(String),
}

/// Check a signature header against the raw body.
///
/// # Errors
///
/// Returns `WebhookError` if the header is malformed, stale, or matches no
/// computed signature.
pub fn verify_signature(
    secret: &SecretString,
    header: &str,
    body: &[u8],
    now_unix: i64,
) -> Result<(), WebhookError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| WebhookError::MalformedHeader("no t=".into()))?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedHeader("no v1=".into()));
    }
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| WebhookError::MalformedHeader("invalid timestamp".into()))?;
    if (now_unix - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::Expired);
    }

    let expected = sign(secret, timestamp, body)?;
    if signatures
        .iter()
        .any(|candidate| constant_time_compare(&expected, candidate))
    {
        debug!("Webhook signature verified");
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{body}"`.
fn sign(secret: &SecretString, timestamp: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| WebhookError::MalformedHeader(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

// =============================================================================
// Events
// =============================================================================

/// The parts of a gateway event we read.
#[derive(Debug, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: String,
    #[serde(default)]
    last_payment_error: Option<IntentError>,
}

#[derive(Debug, Deserialize)]
struct IntentError {
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
}

impl IntentError {
    fn describe(&self) -> String {
        self.decline_code
            .as_deref()
            .or(self.code.as_deref())
            .or(self.message.as_deref())
            .unwrap_or("payment_failed")
            .to_string()
    }
}

/// What handling an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The event changed local state.
    Applied,
    /// Already applied, or refers to an intent we never created.
    NoChange,
    /// Event type we do not handle.
    Ignored,
}

/// Parse a verified body.
///
/// # Errors
///
/// Returns `WebhookError::Payload` if the body is not an event.
pub fn parse_event(body: &[u8]) -> Result<Event, WebhookError> {
    serde_json::from_slice(body).map_err(|e| WebhookError::Payload(e.to_string()))
}

/// Apply a verified event.
///
/// # Errors
///
/// Returns `AppError` if the payload is malformed or a query fails.
#[instrument(skip(state, event), fields(event_id = %event.id, event_type = %event.kind))]
pub async fn handle_event(state: &AppState, event: Event) -> Result<EventOutcome, AppError> {
    match event.kind.as_str() {
        "payment_intent.succeeded" => {
            let object: IntentObject = serde_json::from_value(event.data.object)
                .map_err(|e| WebhookError::Payload(e.to_string()))?;
            intent_succeeded(state, &object.id).await
        }
        "payment_intent.payment_failed" => {
            let object: IntentObject = serde_json::from_value(event.data.object)
                .map_err(|e| WebhookError::Payload(e.to_string()))?;
            let reason = object.last_payment_error.as_ref().map(IntentError::describe);
            intent_failed(state, &object.id, reason.as_deref()).await
        }
        other => {
            debug!(event_type = other, "Ignoring webhook event");
            Ok(EventOutcome::Ignored)
        }
    }
}

async fn intent_succeeded(state: &AppState, gateway_id: &str) -> Result<EventOutcome, AppError> {
    let mut tx = state.pool().begin().await?;
    let Some(intent) = payments::lock_by_gateway_id(&mut tx, gateway_id).await? else {
        warn!(gateway_id, "Webhook for unknown payment intent");
        return Ok(EventOutcome::NoChange);
    };
    let order = locked_order(&mut tx, intent.order_id).await?;

    let newly_paid = super::record_success(&mut tx, &order, &intent).await?;
    tx.commit().await?;

    if newly_paid {
        info!(order_id = %order.id, "Order paid via webhook");
        Ok(EventOutcome::Applied)
    } else {
        Ok(EventOutcome::NoChange)
    }
}

async fn intent_failed(
    state: &AppState,
    gateway_id: &str,
    reason: Option<&str>,
) -> Result<EventOutcome, AppError> {
    let mut tx = state.pool().begin().await?;
    let Some(intent) = payments::lock_by_gateway_id(&mut tx, gateway_id).await? else {
        warn!(gateway_id, "Webhook for unknown payment intent");
        return Ok(EventOutcome::NoChange);
    };
    let order = locked_order(&mut tx, intent.order_id).await?;

    let changed = super::record_failure(&mut tx, &order, &intent, reason).await?;
    tx.commit().await?;

    if changed && !intent.off_session {
        state.notifier().send(
            order.user_id,
            Notice::PaymentFailed {
                order_id: order.id,
                total: order.total,
                currency: order.currency,
                reason: reason.unwrap_or("payment_failed").to_string(),
            },
        );
    }
    Ok(if changed {
        EventOutcome::Applied
    } else {
        EventOutcome::NoChange
    })
}

async fn locked_order(
    conn: &mut sqlx::PgConnection,
    order_id: OrderId,
) -> Result<crate::models::Order, AppError> {
    orders::lock(conn, order_id).await?.ok_or_else(|| {
        AppError::Internal(format!("payment intent references missing order {order_id}"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const NOW: i64 = 1_760_000_000;

    fn secret() -> SecretString {
        SecretString::from("whsec_test_9f8a7b6c5d4e3f2a1b0c")
    }

    fn header_for(body: &[u8], ts: i64) -> String {
        let sig = sign(&secret(), &ts.to_string(), body).unwrap();
        format!("t={ts},v1={sig}")
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "ab"));
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"id":"evt_1"}"#;
        let header = header_for(body, NOW);
        assert!(verify_signature(&secret(), &header, body, NOW + 10).is_ok());
    }

    #[test]
    fn test_any_v1_entry_may_match() {
        let body = br#"{"id":"evt_1"}"#;
        let good = sign(&secret(), &NOW.to_string(), body).unwrap();
        let header = format!("t={NOW},v1={},v1={good}", "0".repeat(64));
        assert!(verify_signature(&secret(), &header, body, NOW).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = header_for(br#"{"amount":100}"#, NOW);
        assert!(matches!(
            verify_signature(&secret(), &header, br#"{"amount":1}"#, NOW),
            Err(WebhookError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let body = b"{}";
        let header = header_for(body, NOW - SIGNATURE_TOLERANCE_SECS - 1);
        assert!(matches!(
            verify_signature(&secret(), &header, body, NOW),
            Err(WebhookError::Expired)
        ));
    }

    #[test]
    fn test_malformed_header_rejected() {
        assert!(matches!(
            verify_signature(&secret(), "v1=abc", b"{}", NOW),
            Err(WebhookError::MalformedHeader(_))
        ));
        assert!(matches!(
            verify_signature(&secret(), &format!("t={NOW}"), b"{}", NOW),
            Err(WebhookError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_parse_event() {
        let event = parse_event(
            br#"{"id":"evt_1","type":"payment_intent.payment_failed",
                 "data":{"object":{"id":"pi_1","last_payment_error":{"code":"card_declined"}}}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, "payment_intent.payment_failed");
        let object: IntentObject = serde_json::from_value(event.data.object).unwrap();
        assert_eq!(object.id, "pi_1");
        assert_eq!(object.last_payment_error.unwrap().describe(), "card_declined");
    }
}
