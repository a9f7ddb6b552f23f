//! Payment gateway abstraction and the bookkeeping shared by the webhook and
//! the renewal scheduler.

pub mod stripe;
pub mod webhook;

use async_trait::async_trait;
use larder_core::{CurrencyCode, OrderId, OrderStatus, PaymentStatus, TransactionKind};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::RepositoryError;
use crate::db::{orders, payments};
use crate::models::{Order, PaymentIntent};

pub use stripe::StripeGateway;

/// Errors from the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Amount cannot be expressed in minor units.
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// The card or payment method was declined.
    #[error("payment declined: {0}")]
    Declined(String),
}

/// Start collecting an amount from a customer who is present.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub order_id: OrderId,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub customer_ref: Option<String>,
    pub idempotency_key: String,
}

/// Charge a saved payment method without the customer present.
#[derive(Debug, Clone)]
pub struct OffSessionCharge {
    pub order_id: OrderId,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub customer_ref: Option<String>,
    pub payment_method_ref: String,
    pub idempotency_key: String,
}

/// Refund a captured intent, fully or in part.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub gateway_intent_id: String,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub idempotency_key: String,
}

/// The gateway's view of an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: PaymentStatus,
    pub last_error: Option<String>,
}

/// A created refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRefund {
    pub id: String,
    pub status: String,
}

/// A card payment provider.
///
/// A declined off-session charge comes back as `Ok` with a failed status so
/// the caller can record the attempt; `Err` means the gateway could not be
/// reached or rejected the request itself.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an intent the customer confirms client-side.
    async fn create_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError>;

    /// Create and confirm an intent against a saved payment method.
    async fn charge_off_session(
        &self,
        charge: &OffSessionCharge,
    ) -> Result<GatewayIntent, GatewayError>;

    /// Refund a succeeded intent.
    async fn refund(&self, request: &RefundRequest) -> Result<GatewayRefund, GatewayError>;
}

/// Record a succeeded intent against its (locked) order.
///
/// Idempotent: a redelivered event finds the charge already recorded and the
/// order already paid. Returns `true` when this call moved the order to paid.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if a statement fails.
pub async fn record_success(
    conn: &mut PgConnection,
    order: &Order,
    intent: &PaymentIntent,
) -> Result<bool, RepositoryError> {
    payments::set_intent_status(&mut *conn, intent.id, PaymentStatus::Succeeded, None).await?;

    let recorded = payments::record_transaction(
        &mut *conn,
        payments::NewTransaction {
            order_id: order.id,
            payment_intent_id: Some(intent.id),
            kind: TransactionKind::Charge,
            amount: intent.amount,
            currency: intent.currency,
            gateway_reference: &intent.gateway_id,
        },
    )
    .await?;

    if order.status.is_paid() {
        if !recorded {
            info!(order_id = %order.id, "Charge already recorded");
        }
        return Ok(false);
    }
    if !order.status.can_transition_to(OrderStatus::Paid) {
        warn!(
            order_id = %order.id,
            status = %order.status,
            gateway_id = %intent.gateway_id,
            "Payment succeeded for an order that can no longer be paid"
        );
        return Ok(false);
    }

    orders::set_status(&mut *conn, order.id, OrderStatus::Paid).await?;
    info!(order_id = %order.id, gateway_id = %intent.gateway_id, "Order paid");
    Ok(true)
}

/// Record a failed intent against its (locked) order.
///
/// Returns `true` when this call moved the order to `payment_failed`.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if a statement fails.
pub async fn record_failure(
    conn: &mut PgConnection,
    order: &Order,
    intent: &PaymentIntent,
    reason: Option<&str>,
) -> Result<bool, RepositoryError> {
    payments::set_intent_status(&mut *conn, intent.id, PaymentStatus::Failed, reason).await?;

    if order.status != OrderStatus::Pending {
        return Ok(false);
    }
    orders::set_status(&mut *conn, order.id, OrderStatus::PaymentFailed).await?;
    info!(order_id = %order.id, gateway_id = %intent.gateway_id, "Order payment failed");
    Ok(true)
}

#[cfg(test)]
pub mod fake {
    //! In-memory gateway for tests.

    use std::sync::Mutex;

    use super::*;

    /// Records every call and answers from canned outcomes.
    #[derive(Debug, Default)]
    pub struct FakeGateway {
        pub decline_off_session: bool,
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_intent(
            &self,
            request: &IntentRequest,
        ) -> Result<GatewayIntent, GatewayError> {
            self.calls
                .lock()
                .map_err(|e| GatewayError::Parse(e.to_string()))?
                .push(format!("intent:{}", request.idempotency_key));
            Ok(GatewayIntent {
                id: format!("pi_fake_{}", request.order_id),
                client_secret: Some(format!("pi_fake_{}_secret", request.order_id)),
                status: PaymentStatus::RequiresPaymentMethod,
                last_error: None,
            })
        }

        async fn charge_off_session(
            &self,
            charge: &OffSessionCharge,
        ) -> Result<GatewayIntent, GatewayError> {
            self.calls
                .lock()
                .map_err(|e| GatewayError::Parse(e.to_string()))?
                .push(format!("charge:{}", charge.idempotency_key));
            let (status, last_error) = if self.decline_off_session {
                (PaymentStatus::Failed, Some("card_declined".to_string()))
            } else {
                (PaymentStatus::Succeeded, None)
            };
            Ok(GatewayIntent {
                id: format!("pi_fake_{}", charge.idempotency_key),
                client_secret: None,
                status,
                last_error,
            })
        }

        async fn refund(&self, request: &RefundRequest) -> Result<GatewayRefund, GatewayError> {
            self.calls
                .lock()
                .map_err(|e| GatewayError::Parse(e.to_string()))?
                .push(format!("refund:{}", request.gateway_intent_id));
            Ok(GatewayRefund {
                id: format!("re_fake_{}", request.gateway_intent_id),
                status: "succeeded".to_string(),
            })
        }
    }
}
