//! Payment intents and money movements.

use chrono::{DateTime, Utc};
use larder_core::{
    CurrencyCode, OrderId, PaymentIntentId, PaymentStatus, TransactionId, TransactionKind,
};
use rust_decimal::Decimal;
use serde::Serialize;

/// One gateway attempt to collect an order's total.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentIntent {
    pub id: PaymentIntentId,
    pub order_id: OrderId,
    pub gateway_id: String,
    /// Only handed to the customer when the intent is created.
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub status: PaymentStatus,
    pub off_session: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A charge or refund that actually moved money.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: TransactionId,
    pub order_id: OrderId,
    pub payment_intent_id: Option<PaymentIntentId>,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub gateway_reference: String,
    pub created_at: DateTime<Utc>,
}
