//! Order reads, cancellation, admin status changes, refunds and payment intents.

use larder_core::{OrderId, OrderStatus, PaymentStatus, TransactionKind};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument};

use super::payments::{IntentRequest, PaymentGateway, RefundRequest};
use crate::db::{self, RepositoryError, orders, payments, products, promocodes};
use crate::error::AppError;
use crate::models::{Order, OrderDetail, User};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn not_found() -> AppError {
    AppError::NotFound("order".to_string())
}

/// Load an order the user owns. Other users' orders look missing.
async fn owned(pool: &PgPool, user: &User, id: OrderId) -> Result<Order, AppError> {
    orders::get(pool, id)
        .await?
        .filter(|o| o.user_id == user.id)
        .ok_or_else(not_found)
}

async fn locked(conn: &mut PgConnection, id: OrderId) -> Result<Order, AppError> {
    orders::lock(conn, id).await?.ok_or_else(not_found)
}

/// Items, intents and transactions for an order.
///
/// # Errors
///
/// Returns `AppError::Database` if a query fails.
pub async fn detail(pool: &PgPool, order: Order) -> Result<OrderDetail, AppError> {
    let items = orders::items(pool, order.id).await?;
    let payments = payments::intents_for_order(pool, order.id).await?;
    let transactions = payments::transactions_for_order(pool, order.id).await?;
    Ok(OrderDetail {
        order,
        items,
        payments,
        transactions,
    })
}

/// The caller's orders, newest first.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn list_for_user(pool: &PgPool, user: &User, query: &ListQuery) -> Result<Vec<Order>, AppError> {
    let (limit, offset) = db::page(query.limit, query.offset);
    Ok(orders::list_for_user(pool, user.id, limit, offset).await?)
}

/// One of the caller's orders with its items and payments.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the order does not exist or is not theirs.
pub async fn get_for_user(pool: &PgPool, user: &User, id: OrderId) -> Result<OrderDetail, AppError> {
    let order = owned(pool, user, id).await?;
    detail(pool, order).await
}

/// Put an order's stock back and release its promocode.
async fn release(conn: &mut PgConnection, order: &Order) -> Result<(), RepositoryError> {
    let items = orders::items(&mut *conn, order.id).await?;
    let mut items: Vec<_> = items.iter().map(|i| (i.variant_id, i.quantity)).collect();
    items.sort_unstable_by_key(|(id, _)| *id);
    for (variant_id, quantity) in items {
        products::adjust_stock(&mut *conn, variant_id, quantity).await?;
    }
    promocodes::release_for_order(conn, order.id).await
}

/// Cancel an order the customer has not paid for yet.
///
/// # Errors
///
/// Returns `AppError::NotFound` for someone else's order and
/// `AppError::Conflict` once the order has been paid.
#[instrument(skip(pool, user), fields(user_id = %user.id))]
pub async fn cancel(pool: &PgPool, user: &User, id: OrderId) -> Result<OrderDetail, AppError> {
    let mut tx = pool.begin().await?;
    let order = locked(&mut tx, id).await?;
    if order.user_id != user.id {
        return Err(not_found());
    }
    if !order.status.is_cancellable_by_customer() {
        return Err(AppError::Conflict(format!(
            "order is {} and can no longer be cancelled",
            order.status
        )));
    }

    release(&mut tx, &order).await?;
    orders::set_status(&mut tx, order.id, OrderStatus::Cancelled).await?;
    tx.commit().await?;
    info!(order_id = %id, "Order cancelled by customer");

    let order = owned(pool, user, id).await?;
    detail(pool, order).await
}

// =============================================================================
// Admin
// =============================================================================

/// All orders, optionally filtered by status.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn list_all(pool: &PgPool, query: &ListQuery) -> Result<Vec<Order>, AppError> {
    let (limit, offset) = db::page(query.limit, query.offset);
    Ok(orders::list_all(pool, query.status, limit, offset).await?)
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: OrderStatus,
}

/// Move an order along its lifecycle.
///
/// Cancelling restocks the items and releases any promocode. Only unpaid
/// orders can be cancelled; paid ones go through [`refund`].
///
/// # Errors
///
/// Returns `AppError::Transition` for a disallowed change and
/// `AppError::BadRequest` for `refunded`.
#[instrument(skip(pool))]
pub async fn set_status(pool: &PgPool, id: OrderId, to: OrderStatus) -> Result<OrderDetail, AppError> {
    if to == OrderStatus::Refunded {
        return Err(AppError::BadRequest(
            "use the refund endpoint to refund an order".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let order = locked(&mut tx, id).await?;
    order.status.transition(to)?;

    if to == OrderStatus::Cancelled {
        release(&mut tx, &order).await?;
    }
    orders::set_status(&mut tx, id, to).await?;
    tx.commit().await?;
    info!(order_id = %id, from = %order.status, to = %to, "Order status changed");

    let order = orders::get(pool, id).await?.ok_or_else(not_found)?;
    detail(pool, order).await
}

/// Refund a paid order in full through the gateway.
///
/// # Errors
///
/// Returns `AppError::Conflict` if the order is not paid or has no captured
/// payment, and `AppError::Gateway` if the refund is rejected.
#[instrument(skip(pool, gateway))]
pub async fn refund(
    pool: &PgPool,
    gateway: &dyn PaymentGateway,
    id: OrderId,
) -> Result<OrderDetail, AppError> {
    let mut tx = pool.begin().await?;
    let order = locked(&mut tx, id).await?;
    if !order.status.is_paid() {
        return Err(AppError::Conflict("only paid orders can be refunded".to_string()));
    }
    order.status.transition(OrderStatus::Refunded)?;
    let intent = payments::succeeded_intent_for_order(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::Conflict("order has no captured payment".to_string()))?;

    let refund = gateway
        .refund(&RefundRequest {
            gateway_intent_id: intent.gateway_id.clone(),
            amount: intent.amount,
            currency: intent.currency,
            idempotency_key: format!("refund-{id}"),
        })
        .await?;

    payments::record_transaction(
        &mut tx,
        payments::NewTransaction {
            order_id: id,
            payment_intent_id: Some(intent.id),
            kind: TransactionKind::Refund,
            amount: intent.amount,
            currency: intent.currency,
            gateway_reference: &refund.id,
        },
    )
    .await?;
    orders::set_status(&mut tx, id, OrderStatus::Refunded).await?;
    tx.commit().await?;
    info!(order_id = %id, refund_id = %refund.id, amount = %intent.amount, "Order refunded");

    let order = orders::get(pool, id).await?.ok_or_else(not_found)?;
    detail(pool, order).await
}

// =============================================================================
// Payment intents
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub order_id: OrderId,
}

/// What the client needs to confirm a payment.
#[derive(Debug, Clone, Serialize)]
pub struct IntentResponse {
    pub order_id: OrderId,
    pub gateway_id: String,
    pub client_secret: String,
    pub amount: rust_decimal::Decimal,
    pub currency: larder_core::CurrencyCode,
    pub status: PaymentStatus,
}

/// Start (or resume) payment for one of the caller's orders.
///
/// # Errors
///
/// Returns `AppError::NotFound` for someone else's order,
/// `AppError::Conflict` if the order does not accept payment and
/// `AppError::Gateway` if the gateway call fails.
#[instrument(skip(pool, gateway, user), fields(user_id = %user.id))]
pub async fn create_intent(
    pool: &PgPool,
    gateway: &dyn PaymentGateway,
    user: &User,
    order_id: OrderId,
) -> Result<IntentResponse, AppError> {
    let order = owned(pool, user, order_id).await?;
    if !order.status.accepts_payment() {
        return Err(AppError::Conflict(format!(
            "order is {} and does not accept payment",
            order.status
        )));
    }

    if let Some(open) = payments::open_intent_for_order(pool, order.id, order.total).await?
        && let Some(client_secret) = open.client_secret
    {
        return Ok(IntentResponse {
            order_id: order.id,
            gateway_id: open.gateway_id,
            client_secret,
            amount: open.amount,
            currency: open.currency,
            status: open.status,
        });
    }

    let attempt = payments::intents_for_order(pool, order.id).await?.len() + 1;
    let created = gateway
        .create_intent(&IntentRequest {
            order_id: order.id,
            amount: order.total,
            currency: order.currency,
            customer_ref: user.gateway_customer_id.clone(),
            idempotency_key: format!("order-{}-attempt-{attempt}", order.id),
        })
        .await?;
    let client_secret = created
        .client_secret
        .clone()
        .ok_or_else(|| AppError::Internal("gateway returned no client secret".to_string()))?;

    let mut conn = pool.acquire().await?;
    let intent = payments::upsert_intent(
        &mut conn,
        payments::NewPaymentIntent {
            order_id: order.id,
            gateway_id: &created.id,
            client_secret: Some(&client_secret),
            amount: order.total,
            currency: order.currency,
            status: created.status,
            off_session: false,
            last_error: created.last_error.as_deref(),
        },
    )
    .await?;
    info!(order_id = %order.id, gateway_id = %intent.gateway_id, "Payment intent created");

    Ok(IntentResponse {
        order_id: order.id,
        gateway_id: intent.gateway_id,
        client_secret,
        amount: intent.amount,
        currency: intent.currency,
        status: intent.status,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::state::test_support::lazy_state;

    #[tokio::test]
    async fn test_refunded_status_goes_through_refund() {
        let state = lazy_state();
        let err = set_status(state.pool(), OrderId::new(1), OrderStatus::Refunded)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_list_query_status_filter() {
        let query: ListQuery = serde_json::from_str(r#"{"status":"payment_failed","limit":5}"#).unwrap();
        assert_eq!(query.status, Some(OrderStatus::PaymentFailed));
        assert_eq!(query.limit, Some(5));
    }
}
