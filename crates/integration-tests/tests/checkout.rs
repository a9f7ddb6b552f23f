//! Cart to order against a real database.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use larder_api::db::{UserRepository, promocodes};
use larder_api::error::AppError;
use larder_api::services::cart::{self, SetItemRequest};
use larder_api::services::checkout::{self, CheckoutRequest, QuoteRequest};
use larder_core::{OrderStatus, PromocodeKind, UserRole, VariantId};
use larder_integration_tests::{FakeGateway, address, state, user, variant};
use rust_decimal::Decimal;
use sqlx::PgPool;

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

async fn stock_of(pool: &PgPool, id: VariantId) -> i32 {
    sqlx::query_scalar("SELECT stock FROM shop.product_variants WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn checkout_request(promocode: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        promocode: promocode.map(str::to_string),
        shipping_address: address(),
    }
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_checkout_places_order_and_empties_cart(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let policy = &state.config().pricing;
    let buyer = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 5).await;

    cart::set_item(
        &pool,
        policy,
        &buyer,
        &SetItemRequest {
            variant_id: oats.id,
            quantity: 2,
        },
    )
    .await
    .unwrap();

    let quote = checkout::quote(&pool, policy, &buyer, &QuoteRequest::default())
        .await
        .unwrap();
    assert_eq!(quote.breakdown.total, d("28.08"));

    let order = checkout::place_order(
        &pool,
        policy,
        state.config().currency,
        state.notifier(),
        &buyer,
        &checkout_request(None),
    )
    .await
    .unwrap();

    assert_eq!(order.order.status, OrderStatus::Pending);
    assert_eq!(order.order.subtotal, d("20.00"));
    assert_eq!(order.order.admin_fee, d("1.00"));
    assert_eq!(order.order.delivery_fee, d("5.00"));
    assert_eq!(order.order.tax, d("2.08"));
    assert_eq!(order.order.total, quote.breakdown.total);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items.first().unwrap().sku, "ROLLED-OATS");

    assert_eq!(stock_of(&pool, oats.id).await, 3);
    let view = cart::view(&pool, policy, &buyer).await.unwrap();
    assert!(view.lines.is_empty());
    assert!(view.breakdown.is_none());
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_checkout_short_stock_rolls_back(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let policy = &state.config().pricing;
    let buyer = user(&pool, "ada@example.org", UserRole::Customer).await;
    let tea = variant(&pool, "sencha-green-tea", d("8.50"), 3).await;

    cart::set_item(
        &pool,
        policy,
        &buyer,
        &SetItemRequest {
            variant_id: tea.id,
            quantity: 3,
        },
    )
    .await
    .unwrap();
    sqlx::query("UPDATE shop.product_variants SET stock = 1 WHERE id = $1")
        .bind(tea.id)
        .execute(&pool)
        .await
        .unwrap();

    let err = checkout::place_order(
        &pool,
        policy,
        state.config().currency,
        state.notifier(),
        &buyer,
        &checkout_request(None),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");

    assert_eq!(stock_of(&pool, tea.id).await, 1);
    let view = cart::view(&pool, policy, &buyer).await.unwrap();
    assert_eq!(view.lines.len(), 1);
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_empty_cart_cannot_check_out(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let buyer = user(&pool, "ada@example.org", UserRole::Customer).await;

    let err = checkout::place_order(
        &pool,
        &state.config().pricing,
        state.config().currency,
        state.notifier(),
        &buyer,
        &checkout_request(None),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "{err:?}");
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_single_use_promocode_redeemed_once(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let policy = &state.config().pricing;
    let coffee = variant(&pool, "house-blend-coffee", d("10.00"), 10).await;
    let code = promocodes::create(
        &pool,
        promocodes::NewPromocode {
            code: "WELCOME10",
            kind: PromocodeKind::Percentage,
            value: d("10"),
            min_order_amount: None,
            max_uses: Some(1),
            per_user_limit: None,
            starts_at: None,
            ends_at: None,
        },
    )
    .await
    .unwrap();

    let first = user(&pool, "ada@example.org", UserRole::Customer).await;
    let second = user(&pool, "grace@example.org", UserRole::Customer).await;
    for buyer in [&first, &second] {
        cart::set_item(
            &pool,
            policy,
            buyer,
            &SetItemRequest {
                variant_id: coffee.id,
                quantity: 2,
            },
        )
        .await
        .unwrap();
    }

    let order = checkout::place_order(
        &pool,
        policy,
        state.config().currency,
        state.notifier(),
        &first,
        &checkout_request(Some("welcome10")),
    )
    .await
    .unwrap();
    assert_eq!(order.order.promocode_id, Some(code.id));
    assert_eq!(order.order.discount, d("2.00"));
    assert_eq!(order.order.total, d("26.08"));

    let err = checkout::place_order(
        &pool,
        policy,
        state.config().currency,
        state.notifier(),
        &second,
        &checkout_request(Some("WELCOME10")),
    )
    .await
    .unwrap_err();
    assert!(
        matches!(err, AppError::Promocode(_) | AppError::Conflict(_)),
        "{err:?}"
    );

    let times_used: i32 =
        sqlx::query_scalar("SELECT times_used FROM shop.promocodes WHERE id = $1")
            .bind(code.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(times_used, 1);
    assert_eq!(stock_of(&pool, coffee.id).await, 8);
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_redemption_records_discount_actually_applied(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let policy = &state.config().pricing;
    let oats = variant(&pool, "rolled-oats", d("10.00"), 10).await;
    let code = promocodes::create(
        &pool,
        promocodes::NewPromocode {
            code: "BIGTHANKS",
            kind: PromocodeKind::FixedAmount,
            value: d("25.00"),
            min_order_amount: None,
            max_uses: None,
            per_user_limit: None,
            starts_at: None,
            ends_at: None,
        },
    )
    .await
    .unwrap();

    let created = user(&pool, "ada@example.org", UserRole::Customer).await;
    sqlx::query("UPDATE shop.users SET loyalty_rate = 0.5 WHERE id = $1")
        .bind(created.id)
        .execute(&pool)
        .await
        .unwrap();
    let buyer = UserRepository::new(&pool)
        .get_by_id(created.id)
        .await
        .unwrap()
        .unwrap();

    cart::set_item(
        &pool,
        policy,
        &buyer,
        &SetItemRequest {
            variant_id: oats.id,
            quantity: 2,
        },
    )
    .await
    .unwrap();
    let order = checkout::place_order(
        &pool,
        policy,
        state.config().currency,
        state.notifier(),
        &buyer,
        &checkout_request(Some("BIGTHANKS")),
    )
    .await
    .unwrap();

    // Loyalty 10.00 plus the code's 20.00 exceeds the 28.08 gross.
    assert_eq!(order.order.discount, d("28.08"));
    assert_eq!(order.order.total, Decimal::ZERO);

    let recorded: Decimal = sqlx::query_scalar(
        "SELECT discount FROM shop.promocode_redemptions WHERE promocode_id = $1",
    )
    .bind(code.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(recorded, d("18.08"));
}
