//! Subscription queries, including the renewal claim.

use chrono::{DateTime, Utc};
use larder_core::{
    BillingCycle, CostBreakdown, CurrencyCode, SubscriptionId, SubscriptionStatus, UserId,
    VariantId,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use super::RepositoryError;
use crate::models::{ShippingAddress, Subscription, SubscriptionItem};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, status, billing_cycle, currency, \
     next_billing_date, billing_anchor, billing_period, failed_attempts, creation_pricing, \
     shipping_address, payment_method_ref, \
     pause_reason, cancel_reason, cancelled_at, last_renewed_at, created_at, updated_at";

/// Fields for a new subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription<'a> {
    pub user_id: UserId,
    pub billing_cycle: BillingCycle,
    pub currency: CurrencyCode,
    pub next_billing_date: DateTime<Utc>,
    pub creation_pricing: &'a CostBreakdown,
    pub shipping_address: &'a ShippingAddress,
    pub payment_method_ref: Option<&'a str>,
}

/// Item with the unit price it was snapshotted at.
#[derive(Debug, Clone, Copy)]
pub struct NewSubscriptionItem {
    pub variant_id: VariantId,
    pub quantity: i32,
    pub unit_price_at_creation: Decimal,
}

/// Partial update of the non-item fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionChanges {
    pub billing_cycle: Option<BillingCycle>,
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method_ref: Option<String>,
}

/// Insert a subscription row.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn insert(
    conn: &mut PgConnection,
    new: NewSubscription<'_>,
) -> Result<Subscription, RepositoryError> {
    let subscription = sqlx::query_as::<_, Subscription>(&format!(
        "INSERT INTO shop.subscriptions \
             (user_id, billing_cycle, currency, next_billing_date, billing_anchor, \
              creation_pricing, shipping_address, payment_method_ref) \
         VALUES ($1, $2, $3, $4, $4, $5, $6, $7) \
         RETURNING {SUBSCRIPTION_COLUMNS}"
    ))
    .bind(new.user_id)
    .bind(new.billing_cycle)
    .bind(new.currency)
    .bind(new.next_billing_date)
    .bind(Json(new.creation_pricing))
    .bind(Json(new.shipping_address))
    .bind(new.payment_method_ref)
    .fetch_one(conn)
    .await?;
    Ok(subscription)
}

/// Replace a subscription's items and pricing snapshot.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if a statement fails.
pub async fn replace_items(
    conn: &mut PgConnection,
    id: SubscriptionId,
    items: &[NewSubscriptionItem],
    creation_pricing: &CostBreakdown,
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM shop.subscription_items WHERE subscription_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    for item in items {
        sqlx::query(
            "INSERT INTO shop.subscription_items \
                 (subscription_id, variant_id, quantity, unit_price_at_creation) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(item.variant_id)
        .bind(item.quantity)
        .bind(item.unit_price_at_creation)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        "UPDATE shop.subscriptions SET creation_pricing = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(Json(creation_pricing))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Get a subscription by ID.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get(pool: &PgPool, id: SubscriptionId) -> Result<Option<Subscription>, RepositoryError> {
    let subscription = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM shop.subscriptions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(subscription)
}

/// Lock a subscription row.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lock(
    conn: &mut PgConnection,
    id: SubscriptionId,
) -> Result<Option<Subscription>, RepositoryError> {
    let subscription = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM shop.subscriptions WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(subscription)
}

/// A user's subscriptions, newest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list_for_user(
    pool: &PgPool,
    user_id: UserId,
) -> Result<Vec<Subscription>, RepositoryError> {
    let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM shop.subscriptions WHERE user_id = $1 \
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(subscriptions)
}

/// Items of a subscription.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn items<'e, E>(
    executor: E,
    id: SubscriptionId,
) -> Result<Vec<SubscriptionItem>, RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    let items = sqlx::query_as::<_, SubscriptionItem>(
        "SELECT subscription_id, variant_id, quantity, unit_price_at_creation \
         FROM shop.subscription_items WHERE subscription_id = $1 ORDER BY variant_id",
    )
    .bind(id)
    .fetch_all(executor)
    .await?;
    Ok(items)
}

/// Apply a partial update to the non-item fields.
///
/// A new billing cycle restarts the schedule at the current next billing
/// date. The payment method reference is stored trimmed.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the update fails.
pub async fn update_details(
    conn: &mut PgConnection,
    id: SubscriptionId,
    changes: &SubscriptionChanges,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE shop.subscriptions SET \
             billing_anchor = CASE WHEN COALESCE($2, billing_cycle) <> billing_cycle \
                                   THEN next_billing_date ELSE billing_anchor END, \
             billing_period = CASE WHEN COALESCE($2, billing_cycle) <> billing_cycle \
                                   THEN 0 ELSE billing_period END, \
             billing_cycle = COALESCE($2, billing_cycle), \
             shipping_address = COALESCE($3, shipping_address), \
             payment_method_ref = COALESCE($4, payment_method_ref), \
             updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(changes.billing_cycle)
    .bind(changes.shipping_address.as_ref().map(Json))
    .bind(changes.payment_method_ref.as_deref().map(str::trim))
    .execute(conn)
    .await?;
    Ok(())
}

/// Status change with its bookkeeping columns.
#[derive(Debug, Clone)]
pub struct StatusChange<'a> {
    pub status: SubscriptionStatus,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub failed_attempts: Option<i32>,
    pub pause_reason: Option<&'a str>,
    pub cancel_reason: Option<&'a str>,
}

/// Write a new status. Callers validate the transition first.
///
/// `pause_reason` is replaced (cleared when `None`); `cancelled_at` is set
/// when moving to cancelled.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the update fails.
pub async fn set_status(
    conn: &mut PgConnection,
    id: SubscriptionId,
    change: StatusChange<'_>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE shop.subscriptions SET \
             status = $2, \
             next_billing_date = COALESCE($3, next_billing_date), \
             failed_attempts = COALESCE($4, failed_attempts), \
             pause_reason = $5, \
             cancel_reason = COALESCE($6, cancel_reason), \
             cancelled_at = CASE WHEN $2 = 'cancelled'::shop.subscription_status \
                                 THEN NOW() ELSE cancelled_at END, \
             updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(change.status)
    .bind(change.next_billing_date)
    .bind(change.failed_attempts)
    .bind(change.pause_reason)
    .bind(change.cancel_reason)
    .execute(conn)
    .await?;
    Ok(())
}

// =============================================================================
// Renewal
// =============================================================================

/// Claim the next due active subscription, skipping rows another worker holds.
///
/// The lock lasts until the caller's transaction ends, so two schedulers
/// never bill the same row.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn claim_next_due(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    exclude: &[SubscriptionId],
) -> Result<Option<Subscription>, RepositoryError> {
    let subscription = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM shop.subscriptions \
         WHERE status = 'active' AND next_billing_date <= $1 AND NOT (id = ANY($2)) \
         ORDER BY next_billing_date, id \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED"
    ))
    .bind(now)
    .bind(exclude)
    .fetch_optional(conn)
    .await?;
    Ok(subscription)
}

/// Active subscriptions due at `now`, for the admin view.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list_due(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Subscription>, RepositoryError> {
    let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM shop.subscriptions \
         WHERE status = 'active' AND next_billing_date <= $1 \
         ORDER BY next_billing_date, id LIMIT $2"
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(subscriptions)
}

/// Record a successful renewal. `billing_period` is the index of the period
/// `next_billing_date` belongs to.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the update fails.
pub async fn mark_renewed(
    conn: &mut PgConnection,
    id: SubscriptionId,
    next_billing_date: DateTime<Utc>,
    billing_period: i32,
    renewed_at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE shop.subscriptions SET next_billing_date = $2, billing_period = $3, \
             failed_attempts = 0, last_renewed_at = $4, updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(next_billing_date)
    .bind(billing_period)
    .bind(renewed_at)
    .execute(conn)
    .await?;
    Ok(())
}
