//! Subscription lifecycle.
//!
//! Creating a subscription (or replacing its items) stores two things: each
//! item's unit price, and the full cost breakdown at that moment. The detail
//! view returns that snapshot next to what the same items cost today.

use std::collections::HashSet;

use chrono::{DateTime, NaiveTime, Utc};
use larder_core::{
    Adjustments, BillingCycle, CostBreakdown, CurrencyCode, PricedLine, PricingPolicy,
    SubscriptionId, SubscriptionStatus, VariantId, compute_breakdown,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument};

use crate::db::products::{self, LockedVariant};
use crate::db::subscriptions::{
    self, NewSubscription, NewSubscriptionItem, StatusChange, SubscriptionChanges,
};
use crate::error::AppError;
use crate::models::{ShippingAddress, Subscription, SubscriptionDetail, SubscriptionItem, User};

/// Most distinct variants one subscription may hold.
pub const MAX_ITEMS: usize = 50;
/// Largest quantity per subscription line.
pub const MAX_QUANTITY: i32 = 99;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ItemRequest {
    pub variant_id: VariantId,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub items: Vec<ItemRequest>,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub first_billing_date: Option<DateTime<Utc>>,
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub payment_method_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemsRequest {
    pub items: Vec<ItemRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

fn check_items(items: &[ItemRequest]) -> Result<(), AppError> {
    if items.is_empty() {
        return Err(AppError::Validation("at least one item is required".to_string()));
    }
    if items.len() > MAX_ITEMS {
        return Err(AppError::Validation(format!(
            "at most {MAX_ITEMS} items are allowed"
        )));
    }
    let mut seen = HashSet::new();
    for item in items {
        if !(1..=MAX_QUANTITY).contains(&item.quantity) {
            return Err(AppError::Validation(format!(
                "quantity must be between 1 and {MAX_QUANTITY}"
            )));
        }
        if !seen.insert(item.variant_id) {
            return Err(AppError::Validation(format!(
                "variant {} is listed twice",
                item.variant_id
            )));
        }
    }
    Ok(())
}

fn check_payment_method(payment_method_ref: Option<&str>) -> Result<(), AppError> {
    if payment_method_ref
        .map(str::trim)
        .is_some_and(|r| r.is_empty() || r.len() > 255)
    {
        return Err(AppError::Validation(
            "payment_method_ref must be 1-255 characters".to_string(),
        ));
    }
    Ok(())
}

/// Midnight UTC today. A first billing date before this is rejected.
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Price requested items against current variants.
fn price_items(
    items: &[ItemRequest],
    variants: &[LockedVariant],
) -> Result<Vec<NewSubscriptionItem>, AppError> {
    items
        .iter()
        .map(|item| {
            let variant = variants
                .iter()
                .find(|v| v.id == item.variant_id)
                .ok_or_else(|| AppError::NotFound(format!("variant {}", item.variant_id)))?;
            if !variant.purchasable {
                return Err(AppError::Conflict(format!(
                    "{} is not available",
                    variant.sku
                )));
            }
            Ok(NewSubscriptionItem {
                variant_id: variant.id,
                quantity: item.quantity,
                unit_price_at_creation: variant.price,
            })
        })
        .collect()
}

fn breakdown_for(
    items: &[NewSubscriptionItem],
    policy: &PricingPolicy,
    loyalty_rate: Decimal,
) -> Result<CostBreakdown, AppError> {
    let priced: Vec<PricedLine> = items
        .iter()
        .map(|i| PricedLine {
            variant_id: i.variant_id,
            unit_price: i.unit_price_at_creation,
            quantity: i.quantity,
        })
        .collect();
    Ok(compute_breakdown(
        &priced,
        policy,
        Adjustments {
            loyalty_rate,
            promocode_discount: Decimal::ZERO,
        },
    )?)
}

/// Items priced now, with the breakdown to snapshot.
async fn snapshot(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    items: &[ItemRequest],
) -> Result<(Vec<NewSubscriptionItem>, CostBreakdown), AppError> {
    check_items(items)?;
    let ids: Vec<VariantId> = items.iter().map(|i| i.variant_id).collect();
    let variants = products::variants_for_pricing(pool, &ids).await?;
    let priced = price_items(items, &variants)?;
    let breakdown = breakdown_for(&priced, policy, user.loyalty_rate)?;
    Ok((priced, breakdown))
}

/// What the stored items would cost today, or `None` if none can be bought.
async fn current_pricing(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    items: &[SubscriptionItem],
) -> Result<Option<CostBreakdown>, AppError> {
    let ids: Vec<VariantId> = items.iter().map(|i| i.variant_id).collect();
    let variants = products::variants_for_pricing(pool, &ids).await?;
    let current: Vec<NewSubscriptionItem> = items
        .iter()
        .filter_map(|item| {
            variants
                .iter()
                .find(|v| v.id == item.variant_id && v.purchasable)
                .map(|v| NewSubscriptionItem {
                    variant_id: v.id,
                    quantity: item.quantity,
                    unit_price_at_creation: v.price,
                })
        })
        .collect();
    if current.is_empty() {
        return Ok(None);
    }
    breakdown_for(&current, policy, user.loyalty_rate).map(Some)
}

async fn detail(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    subscription: Subscription,
) -> Result<SubscriptionDetail, AppError> {
    let items = subscriptions::items(pool, subscription.id).await?;
    let current_pricing = current_pricing(pool, policy, user, &items).await?;
    Ok(SubscriptionDetail {
        subscription,
        items,
        current_pricing,
    })
}

fn not_found() -> AppError {
    AppError::NotFound("subscription".to_string())
}

async fn lock_owned(
    conn: &mut PgConnection,
    user: &User,
    id: SubscriptionId,
) -> Result<Subscription, AppError> {
    subscriptions::lock(conn, id)
        .await?
        .filter(|s| s.user_id == user.id)
        .ok_or_else(not_found)
}

fn ensure_open(subscription: &Subscription) -> Result<(), AppError> {
    if subscription.status == SubscriptionStatus::Cancelled {
        return Err(AppError::Conflict("subscription is cancelled".to_string()));
    }
    Ok(())
}

/// Start a subscription.
///
/// # Errors
///
/// Returns `AppError::Validation` for bad items, address or first billing
/// date, `AppError::NotFound` for unknown variants and `AppError::Conflict`
/// for variants that cannot be bought.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn create(
    pool: &PgPool,
    policy: &PricingPolicy,
    currency: CurrencyCode,
    user: &User,
    request: &CreateSubscriptionRequest,
) -> Result<SubscriptionDetail, AppError> {
    request
        .shipping_address
        .validate()
        .map_err(AppError::Validation)?;
    check_payment_method(request.payment_method_ref.as_deref())?;

    let now = Utc::now();
    let next_billing_date = request.first_billing_date.unwrap_or(now);
    if next_billing_date < start_of_day(now) {
        return Err(AppError::Validation(
            "first_billing_date cannot be in the past".to_string(),
        ));
    }

    let (items, breakdown) = snapshot(pool, policy, user, &request.items).await?;

    let mut tx = pool.begin().await?;
    let subscription = subscriptions::insert(
        &mut tx,
        NewSubscription {
            user_id: user.id,
            billing_cycle: request.billing_cycle,
            currency,
            next_billing_date,
            creation_pricing: &breakdown,
            shipping_address: &request.shipping_address,
            payment_method_ref: request.payment_method_ref.as_deref().map(str::trim),
        },
    )
    .await?;
    subscriptions::replace_items(&mut tx, subscription.id, &items, &breakdown).await?;
    tx.commit().await?;
    info!(
        subscription_id = %subscription.id,
        cycle = %subscription.billing_cycle,
        next_billing_date = %subscription.next_billing_date,
        "Subscription created"
    );

    detail(pool, policy, user, subscription).await
}

/// The caller's subscriptions, newest first.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn list(pool: &PgPool, user: &User) -> Result<Vec<Subscription>, AppError> {
    Ok(subscriptions::list_for_user(pool, user.id).await?)
}

/// One of the caller's subscriptions.
///
/// # Errors
///
/// Returns `AppError::NotFound` if it does not exist or is not theirs.
pub async fn get(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    id: SubscriptionId,
) -> Result<SubscriptionDetail, AppError> {
    let subscription = subscriptions::get(pool, id)
        .await?
        .filter(|s| s.user_id == user.id)
        .ok_or_else(not_found)?;
    detail(pool, policy, user, subscription).await
}

async fn reload(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    id: SubscriptionId,
) -> Result<SubscriptionDetail, AppError> {
    get(pool, policy, user, id).await
}

/// Replace the items and take a new pricing snapshot.
///
/// # Errors
///
/// Returns `AppError::Conflict` for a cancelled subscription and the item
/// errors of [`create`].
#[instrument(skip_all, fields(user_id = %user.id, subscription_id = %id))]
pub async fn update_items(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    id: SubscriptionId,
    request: &UpdateItemsRequest,
) -> Result<SubscriptionDetail, AppError> {
    let (items, breakdown) = snapshot(pool, policy, user, &request.items).await?;

    let mut tx = pool.begin().await?;
    let subscription = lock_owned(&mut tx, user, id).await?;
    ensure_open(&subscription)?;
    subscriptions::replace_items(&mut tx, id, &items, &breakdown).await?;
    tx.commit().await?;
    info!(items = items.len(), total = %breakdown.total, "Subscription items replaced");

    reload(pool, policy, user, id).await
}

/// Change billing cycle, shipping address or payment method.
///
/// A new billing cycle starts its schedule at the current next billing date.
///
/// # Errors
///
/// Returns `AppError::Validation` for a bad address and
/// `AppError::Conflict` for a cancelled subscription.
pub async fn update_details(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    id: SubscriptionId,
    changes: &SubscriptionChanges,
) -> Result<SubscriptionDetail, AppError> {
    if let Some(address) = &changes.shipping_address {
        address.validate().map_err(AppError::Validation)?;
    }
    check_payment_method(changes.payment_method_ref.as_deref())?;

    let mut tx = pool.begin().await?;
    let subscription = lock_owned(&mut tx, user, id).await?;
    ensure_open(&subscription)?;
    subscriptions::update_details(&mut tx, id, changes).await?;
    tx.commit().await?;

    reload(pool, policy, user, id).await
}

/// Stop renewals until resumed. Only active subscriptions can be paused.
///
/// # Errors
///
/// Returns `AppError::Transition` if the subscription is not active.
#[instrument(skip_all, fields(user_id = %user.id, subscription_id = %id))]
pub async fn pause(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    id: SubscriptionId,
    reason: Option<&str>,
) -> Result<SubscriptionDetail, AppError> {
    let mut tx = pool.begin().await?;
    let subscription = lock_owned(&mut tx, user, id).await?;
    let status = subscription.status.transition(SubscriptionStatus::Paused)?;
    subscriptions::set_status(
        &mut tx,
        id,
        StatusChange {
            status,
            next_billing_date: None,
            failed_attempts: None,
            pause_reason: Some(reason.unwrap_or("paused by customer")),
            cancel_reason: None,
        },
    )
    .await?;
    tx.commit().await?;
    info!("Subscription paused");

    reload(pool, policy, user, id).await
}

/// Billing date after resuming: the stored date, or now if that has passed.
fn resume_date(next_billing_date: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    next_billing_date.max(now)
}

/// Resume a paused or past-due subscription. Failed attempts reset to zero.
///
/// # Errors
///
/// Returns `AppError::Transition` if the subscription is active or cancelled.
#[instrument(skip_all, fields(user_id = %user.id, subscription_id = %id))]
pub async fn resume(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    id: SubscriptionId,
) -> Result<SubscriptionDetail, AppError> {
    let mut tx = pool.begin().await?;
    let subscription = lock_owned(&mut tx, user, id).await?;
    let status = subscription.status.transition(SubscriptionStatus::Active)?;
    subscriptions::set_status(
        &mut tx,
        id,
        StatusChange {
            status,
            next_billing_date: Some(resume_date(subscription.next_billing_date, Utc::now())),
            failed_attempts: Some(0),
            pause_reason: None,
            cancel_reason: None,
        },
    )
    .await?;
    tx.commit().await?;
    info!(from = %subscription.status, "Subscription resumed");

    reload(pool, policy, user, id).await
}

/// End a subscription for good.
///
/// # Errors
///
/// Returns `AppError::Transition` if it is already cancelled.
#[instrument(skip_all, fields(user_id = %user.id, subscription_id = %id))]
pub async fn cancel(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    id: SubscriptionId,
    reason: Option<&str>,
) -> Result<SubscriptionDetail, AppError> {
    if reason.is_some_and(|r| r.len() > 500) {
        return Err(AppError::Validation("reason is too long".to_string()));
    }
    let mut tx = pool.begin().await?;
    let subscription = lock_owned(&mut tx, user, id).await?;
    let status = subscription.status.transition(SubscriptionStatus::Cancelled)?;
    subscriptions::set_status(
        &mut tx,
        id,
        StatusChange {
            status,
            next_billing_date: None,
            failed_attempts: None,
            pause_reason: None,
            cancel_reason: reason,
        },
    )
    .await?;
    tx.commit().await?;
    info!("Subscription cancelled");

    reload(pool, policy, user, id).await
}

/// Active subscriptions due now, for the admin view.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn list_due(pool: &PgPool, limit: Option<i64>) -> Result<Vec<Subscription>, AppError> {
    let (limit, _) = crate::db::page(limit, None);
    Ok(subscriptions::list_due(pool, Utc::now(), limit).await?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use larder_core::ProductId;

    use super::*;

    fn item(id: i32, quantity: i32) -> ItemRequest {
        ItemRequest {
            variant_id: VariantId::new(id),
            quantity,
        }
    }

    fn variant(id: i32, price: i64, purchasable: bool) -> LockedVariant {
        LockedVariant {
            id: VariantId::new(id),
            product_id: ProductId::new(1),
            product_title: "Ground Coffee".to_string(),
            title: "250g".to_string(),
            sku: format!("COFFEE-{id}"),
            price: Decimal::new(price, 2),
            stock: 0,
            purchasable,
        }
    }

    #[test]
    fn test_check_items() {
        assert!(check_items(&[item(1, 1), item(2, 99)]).is_ok());
        assert!(check_items(&[]).is_err());
        assert!(check_items(&[item(1, 0)]).is_err());
        assert!(check_items(&[item(1, 100)]).is_err());
        assert!(check_items(&[item(1, 1), item(1, 2)]).is_err());
    }

    #[test]
    fn test_price_items_snapshots_current_price() {
        let priced = price_items(&[item(1, 3)], &[variant(1, 1250, true)]).unwrap();
        assert_eq!(priced[0].unit_price_at_creation, Decimal::new(1250, 2));
        assert_eq!(priced[0].quantity, 3);
    }

    #[test]
    fn test_price_items_rejects_unavailable() {
        assert!(matches!(
            price_items(&[item(1, 1)], &[variant(1, 1250, false)]),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            price_items(&[item(2, 1)], &[variant(1, 1250, true)]),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_snapshot_breakdown_verifies() {
        let priced = price_items(&[item(1, 2)], &[variant(1, 1250, true)]).unwrap();
        let breakdown = breakdown_for(&priced, &PricingPolicy::default(), Decimal::ZERO).unwrap();
        assert_eq!(breakdown.subtotal, Decimal::new(2500, 2));
        assert!(breakdown.verify());
    }

    #[test]
    fn test_start_of_day() {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 17, 45, 12).unwrap();
        assert_eq!(
            start_of_day(now),
            Utc.with_ymd_and_hms(2026, 5, 4, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_resume_date_never_in_past() {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        let past = now - chrono::Duration::days(10);
        let future = now + chrono::Duration::days(10);
        assert_eq!(resume_date(past, now), now);
        assert_eq!(resume_date(future, now), future);
    }

    #[test]
    fn test_payment_method_ref() {
        assert!(check_payment_method(None).is_ok());
        assert!(check_payment_method(Some("pm_card_visa")).is_ok());
        assert!(check_payment_method(Some("  ")).is_err());
    }
}
