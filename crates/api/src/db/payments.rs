//! Payment intents and transactions.

use larder_core::{
    CurrencyCode, OrderId, PaymentIntentId, PaymentStatus, TransactionKind,
};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use super::RepositoryError;
use crate::models::{PaymentIntent, Transaction};

const INTENT_COLUMNS: &str = "id, order_id, gateway_id, client_secret, amount, currency, status, \
     off_session, last_error, created_at, updated_at";

const TRANSACTION_COLUMNS: &str =
    "id, order_id, payment_intent_id, kind, amount, currency, gateway_reference, created_at";

/// A gateway intent to record locally.
#[derive(Debug, Clone)]
pub struct NewPaymentIntent<'a> {
    pub order_id: OrderId,
    pub gateway_id: &'a str,
    pub client_secret: Option<&'a str>,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub status: PaymentStatus,
    pub off_session: bool,
    pub last_error: Option<&'a str>,
}

/// Record an intent. Re-recording the same gateway ID updates its status.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn upsert_intent(
    conn: &mut PgConnection,
    new: NewPaymentIntent<'_>,
) -> Result<PaymentIntent, RepositoryError> {
    let intent = sqlx::query_as::<_, PaymentIntent>(&format!(
        "INSERT INTO shop.payment_intents \
             (order_id, gateway_id, client_secret, amount, currency, status, off_session, last_error) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (gateway_id) DO UPDATE SET \
             status = EXCLUDED.status, last_error = EXCLUDED.last_error, updated_at = NOW() \
         RETURNING {INTENT_COLUMNS}"
    ))
    .bind(new.order_id)
    .bind(new.gateway_id)
    .bind(new.client_secret)
    .bind(new.amount)
    .bind(new.currency)
    .bind(new.status)
    .bind(new.off_session)
    .bind(new.last_error)
    .fetch_one(conn)
    .await?;
    Ok(intent)
}

/// The newest intent for an order that can still be confirmed by the customer.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn open_intent_for_order(
    pool: &PgPool,
    order_id: OrderId,
    amount: Decimal,
) -> Result<Option<PaymentIntent>, RepositoryError> {
    let intent = sqlx::query_as::<_, PaymentIntent>(&format!(
        "SELECT {INTENT_COLUMNS} FROM shop.payment_intents \
         WHERE order_id = $1 AND amount = $2 AND NOT off_session AND client_secret IS NOT NULL \
           AND status IN ('requires_payment_method', 'requires_confirmation', 'requires_action') \
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(order_id)
    .bind(amount)
    .fetch_optional(pool)
    .await?;
    Ok(intent)
}

/// Lock an intent by its gateway ID.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lock_by_gateway_id(
    conn: &mut PgConnection,
    gateway_id: &str,
) -> Result<Option<PaymentIntent>, RepositoryError> {
    let intent = sqlx::query_as::<_, PaymentIntent>(&format!(
        "SELECT {INTENT_COLUMNS} FROM shop.payment_intents WHERE gateway_id = $1 FOR UPDATE"
    ))
    .bind(gateway_id)
    .fetch_optional(conn)
    .await?;
    Ok(intent)
}

/// Update an intent's status and error.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the update fails.
pub async fn set_intent_status(
    conn: &mut PgConnection,
    id: PaymentIntentId,
    status: PaymentStatus,
    last_error: Option<&str>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE shop.payment_intents SET status = $2, last_error = $3, updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(status)
    .bind(last_error)
    .execute(conn)
    .await?;
    Ok(())
}

/// The intent whose charge paid for an order.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn succeeded_intent_for_order(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> Result<Option<PaymentIntent>, RepositoryError> {
    let intent = sqlx::query_as::<_, PaymentIntent>(&format!(
        "SELECT {INTENT_COLUMNS} FROM shop.payment_intents \
         WHERE order_id = $1 AND status = 'succeeded' ORDER BY updated_at DESC LIMIT 1"
    ))
    .bind(order_id)
    .fetch_optional(conn)
    .await?;
    Ok(intent)
}

/// All intents for an order, oldest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn intents_for_order(
    pool: &PgPool,
    order_id: OrderId,
) -> Result<Vec<PaymentIntent>, RepositoryError> {
    let intents = sqlx::query_as::<_, PaymentIntent>(&format!(
        "SELECT {INTENT_COLUMNS} FROM shop.payment_intents WHERE order_id = $1 ORDER BY created_at"
    ))
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(intents)
}

/// A charge or refund to record.
#[derive(Debug, Clone)]
pub struct NewTransaction<'a> {
    pub order_id: OrderId,
    pub payment_intent_id: Option<PaymentIntentId>,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub gateway_reference: &'a str,
}

/// Record a transaction once. Returns `false` if this gateway reference was
/// already recorded (a redelivered webhook, for example).
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn record_transaction(
    conn: &mut PgConnection,
    new: NewTransaction<'_>,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO shop.transactions \
             (order_id, payment_intent_id, kind, amount, currency, gateway_reference) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (kind, gateway_reference) DO NOTHING",
    )
    .bind(new.order_id)
    .bind(new.payment_intent_id)
    .bind(new.kind)
    .bind(new.amount)
    .bind(new.currency)
    .bind(new.gateway_reference)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// All transactions for an order, oldest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn transactions_for_order(
    pool: &PgPool,
    order_id: OrderId,
) -> Result<Vec<Transaction>, RepositoryError> {
    let transactions = sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM shop.transactions WHERE order_id = $1 ORDER BY created_at"
    ))
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(transactions)
}
