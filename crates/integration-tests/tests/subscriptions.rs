//! Subscription lifecycle and renewal passes against a real database.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use larder_api::db::subscriptions::SubscriptionChanges;
use larder_api::error::AppError;
use larder_api::models::{SubscriptionDetail, User};
use larder_api::services::orders;
use larder_api::services::renewal::NO_PURCHASABLE_ITEMS;
use larder_api::services::subscriptions::{self, CreateSubscriptionRequest, ItemRequest};
use larder_api::state::AppState;
use larder_core::{
    BillingCycle, OrderId, OrderStatus, SubscriptionId, SubscriptionStatus, UserRole, VariantId,
};
use larder_integration_tests::{FakeGateway, address, state, user, variant};
use rust_decimal::Decimal;
use sqlx::PgPool;

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

async fn subscribe(state: &AppState, owner: &User, variant_id: VariantId) -> SubscriptionDetail {
    subscriptions::create(
        state.pool(),
        &state.config().pricing,
        state.config().currency,
        owner,
        &CreateSubscriptionRequest {
            items: vec![ItemRequest {
                variant_id,
                quantity: 2,
            }],
            billing_cycle: BillingCycle::Monthly,
            first_billing_date: None,
            shipping_address: address(),
            payment_method_ref: Some("pm_card_visa".to_string()),
        },
    )
    .await
    .unwrap()
}

async fn stock_of(pool: &PgPool, id: VariantId) -> i32 {
    sqlx::query_scalar("SELECT stock FROM shop.product_variants WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn order_count(pool: &PgPool, owner: &User) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM shop.orders WHERE user_id = $1")
        .bind(owner.id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Pull the billing date back so the next pass sees the row as due.
async fn make_due(pool: &PgPool, id: SubscriptionId) {
    sqlx::query(
        "UPDATE shop.subscriptions SET next_billing_date = now() - interval '1 minute' WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await
    .unwrap();
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_create_snapshots_pricing(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let owner = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 20).await;

    let detail = subscribe(&state, &owner, oats.id).await;

    assert_eq!(detail.subscription.status, SubscriptionStatus::Active);
    assert_eq!(detail.subscription.failed_attempts, 0);
    assert_eq!(detail.items.len(), 1);
    assert_eq!(detail.items.first().unwrap().unit_price_at_creation, d("10.00"));
    assert_eq!(detail.subscription.creation_pricing.0.total, d("28.08"));
    assert_eq!(
        detail.current_pricing.as_ref().map(|b| b.total),
        Some(d("28.08"))
    );
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_create_rejects_past_first_billing_date(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let owner = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 20).await;

    let err = subscriptions::create(
        &pool,
        &state.config().pricing,
        state.config().currency,
        &owner,
        &CreateSubscriptionRequest {
            items: vec![ItemRequest {
                variant_id: oats.id,
                quantity: 1,
            }],
            billing_cycle: BillingCycle::Weekly,
            first_billing_date: Some(Utc::now() - Duration::days(3)),
            shipping_address: address(),
            payment_method_ref: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "{err:?}");
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_renewal_bills_and_advances(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let state = state(pool.clone(), Arc::clone(&gateway));
    let owner = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 20).await;
    let created = subscribe(&state, &owner, oats.id).await;
    let due = created.subscription.next_billing_date;

    let summary = state.renewal_service().run_once().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(gateway.calls().len(), 1);

    let (status, subscription_id, total): (OrderStatus, Option<SubscriptionId>, Decimal) =
        sqlx::query_as("SELECT status, subscription_id, total FROM shop.orders WHERE user_id = $1")
            .bind(owner.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, OrderStatus::Paid);
    assert_eq!(subscription_id, Some(created.subscription.id));
    assert_eq!(total, d("28.08"));

    let renewed = subscriptions::get(&pool, &state.config().pricing, &owner, created.subscription.id)
        .await
        .unwrap();
    assert!(renewed.subscription.next_billing_date > due);
    assert!(renewed.subscription.last_renewed_at.is_some());
    assert_eq!(renewed.subscription.failed_attempts, 0);

    // Nothing is due until next month.
    let again = state.renewal_service().run_once().await.unwrap();
    assert_eq!(again.processed, 0);
    state.notifier().drain().await;
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_declined_renewals_end_past_due(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let state = state(pool.clone(), Arc::clone(&gateway));
    let owner = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 20).await;
    let id = subscribe(&state, &owner, oats.id).await.subscription.id;
    gateway.decline();

    let summary = state.renewal_service().run_once().await.unwrap();
    assert_eq!(summary.failed, 1);
    let after_one = subscriptions::get(&pool, &state.config().pricing, &owner, id)
        .await
        .unwrap();
    assert_eq!(after_one.subscription.failed_attempts, 1);
    assert_eq!(after_one.subscription.status, SubscriptionStatus::Active);
    assert!(after_one.subscription.next_billing_date > Utc::now());

    assert_eq!(stock_of(&pool, oats.id).await, 20);

    // The declined order is closed so its stock cannot be returned twice.
    let (order_id, status): (OrderId, OrderStatus) =
        sqlx::query_as("SELECT id, status FROM shop.orders WHERE user_id = $1")
            .bind(owner.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, OrderStatus::Cancelled);
    let err = orders::cancel(&pool, &owner, order_id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");
    let err = orders::create_intent(&pool, state.gateway(), &owner, order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");
    assert_eq!(stock_of(&pool, oats.id).await, 20);

    for _ in 0..2 {
        make_due(&pool, id).await;
        state.renewal_service().run_once().await.unwrap();
    }
    let past_due = subscriptions::get(&pool, &state.config().pricing, &owner, id)
        .await
        .unwrap();
    assert_eq!(past_due.subscription.failed_attempts, 3);
    assert_eq!(past_due.subscription.status, SubscriptionStatus::PastDue);

    make_due(&pool, id).await;
    let skipped = state.renewal_service().run_once().await.unwrap();
    assert_eq!(skipped.processed, 0);

    let resumed = subscriptions::resume(&pool, &state.config().pricing, &owner, id)
        .await
        .unwrap();
    assert_eq!(resumed.subscription.status, SubscriptionStatus::Active);
    assert_eq!(resumed.subscription.failed_attempts, 0);
    state.notifier().drain().await;
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_pause_resume_cancel(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let policy = &state.config().pricing;
    let owner = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 20).await;
    let id = subscribe(&state, &owner, oats.id).await.subscription.id;

    let paused = subscriptions::pause(&pool, policy, &owner, id, None).await.unwrap();
    assert_eq!(paused.subscription.status, SubscriptionStatus::Paused);
    assert_eq!(
        paused.subscription.pause_reason.as_deref(),
        Some("paused by customer")
    );

    let summary = state.renewal_service().run_once().await.unwrap();
    assert_eq!(summary.processed, 0);

    let err = subscriptions::pause(&pool, policy, &owner, id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Transition(_)), "{err:?}");

    let resumed = subscriptions::resume(&pool, policy, &owner, id).await.unwrap();
    assert_eq!(resumed.subscription.status, SubscriptionStatus::Active);
    assert!(resumed.subscription.next_billing_date >= paused.subscription.next_billing_date);

    let cancelled = subscriptions::cancel(&pool, policy, &owner, id, Some("moving abroad"))
        .await
        .unwrap();
    assert_eq!(cancelled.subscription.status, SubscriptionStatus::Cancelled);
    assert_eq!(
        cancelled.subscription.cancel_reason.as_deref(),
        Some("moving abroad")
    );
    assert!(cancelled.subscription.cancelled_at.is_some());

    let err = subscriptions::resume(&pool, policy, &owner, id).await.unwrap_err();
    assert!(matches!(err, AppError::Transition(_)), "{err:?}");
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_other_users_subscription_is_not_found(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let owner = user(&pool, "ada@example.org", UserRole::Customer).await;
    let stranger = user(&pool, "eve@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 20).await;
    let id = subscribe(&state, &owner, oats.id).await.subscription.id;

    let err = subscriptions::get(&pool, &state.config().pricing, &stranger, id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "{err:?}");
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_renewal_pauses_when_nothing_is_purchasable(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let state = state(pool.clone(), Arc::clone(&gateway));
    let owner = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 20).await;
    let id = subscribe(&state, &owner, oats.id).await.subscription.id;
    sqlx::query("UPDATE shop.product_variants SET is_active = false WHERE id = $1")
        .bind(oats.id)
        .execute(&pool)
        .await
        .unwrap();

    let summary = state.renewal_service().run_once().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.paused, 1);
    assert!(gateway.calls().is_empty());
    assert_eq!(order_count(&pool, &owner).await, 0);

    let paused = subscriptions::get(&pool, &state.config().pricing, &owner, id)
        .await
        .unwrap();
    assert_eq!(paused.subscription.status, SubscriptionStatus::Paused);
    assert_eq!(
        paused.subscription.pause_reason.as_deref(),
        Some(NO_PURCHASABLE_ITEMS)
    );
    assert_eq!(paused.subscription.failed_attempts, 0);
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_renewal_short_stock_counts_as_failed_attempt(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let state = state(pool.clone(), Arc::clone(&gateway));
    let owner = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 20).await;
    let id = subscribe(&state, &owner, oats.id).await.subscription.id;
    sqlx::query("UPDATE shop.product_variants SET stock = 1 WHERE id = $1")
        .bind(oats.id)
        .execute(&pool)
        .await
        .unwrap();

    let summary = state.renewal_service().run_once().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(gateway.calls().is_empty());
    assert_eq!(order_count(&pool, &owner).await, 0);
    assert_eq!(stock_of(&pool, oats.id).await, 1);

    let failed = subscriptions::get(&pool, &state.config().pricing, &owner, id)
        .await
        .unwrap();
    assert_eq!(failed.subscription.status, SubscriptionStatus::Active);
    assert_eq!(failed.subscription.failed_attempts, 1);
    assert!(failed.subscription.next_billing_date > Utc::now());
    state.notifier().drain().await;
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_retried_renewal_keeps_anchor_schedule(pool: PgPool) {
    let gateway = Arc::new(FakeGateway::default());
    let state = state(pool.clone(), Arc::clone(&gateway));
    let owner = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 20).await;
    let created = subscribe(&state, &owner, oats.id).await.subscription;
    assert_eq!(created.billing_anchor, created.next_billing_date);
    assert_eq!(created.billing_period, 0);

    gateway.decline();
    state.renewal_service().run_once().await.unwrap();
    gateway.approve();
    make_due(&pool, created.id).await;
    let summary = state.renewal_service().run_once().await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let renewed = subscriptions::get(&pool, &state.config().pricing, &owner, created.id)
        .await
        .unwrap()
        .subscription;
    assert_eq!(renewed.billing_anchor, created.billing_anchor);
    assert_eq!(renewed.billing_period, 1);
    assert_eq!(
        Some(renewed.next_billing_date),
        BillingCycle::Monthly.advance_by(created.billing_anchor, 1)
    );
    state.notifier().drain().await;
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_update_details_trims_and_reanchors(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let policy = &state.config().pricing;
    let owner = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 20).await;
    let id = subscribe(&state, &owner, oats.id).await.subscription.id;
    sqlx::query(
        "UPDATE shop.subscriptions SET billing_period = 4, \
             next_billing_date = billing_anchor + interval '4 months' WHERE id = $1",
    )
    .bind(id)
    .execute(&pool)
    .await
    .unwrap();

    let updated = subscriptions::update_details(
        &pool,
        policy,
        &owner,
        id,
        &SubscriptionChanges {
            payment_method_ref: Some("  pm_card_mastercard \n".to_string()),
            ..SubscriptionChanges::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(
        updated.subscription.payment_method_ref.as_deref(),
        Some("pm_card_mastercard")
    );
    assert_eq!(updated.subscription.billing_period, 4);

    let err = subscriptions::update_details(
        &pool,
        policy,
        &owner,
        id,
        &SubscriptionChanges {
            payment_method_ref: Some("   ".to_string()),
            ..SubscriptionChanges::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "{err:?}");

    let weekly = subscriptions::update_details(
        &pool,
        policy,
        &owner,
        id,
        &SubscriptionChanges {
            billing_cycle: Some(BillingCycle::Weekly),
            ..SubscriptionChanges::default()
        },
    )
    .await
    .unwrap()
    .subscription;
    assert_eq!(weekly.billing_cycle, BillingCycle::Weekly);
    assert_eq!(weekly.billing_period, 0);
    assert_eq!(weekly.billing_anchor, weekly.next_billing_date);
}
