//! Reviews against a real database.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use larder_api::error::AppError;
use larder_api::models::{Review, User};
use larder_api::services::cart::{self, SetItemRequest};
use larder_api::services::checkout::{self, CheckoutRequest};
use larder_api::services::reviews::{self, CreateReviewRequest};
use larder_api::state::AppState;
use larder_core::{UserRole, VariantId};
use larder_integration_tests::{FakeGateway, address, state, user, variant};
use rust_decimal::Decimal;
use sqlx::PgPool;

fn review(rating: i16, title: &str) -> CreateReviewRequest {
    CreateReviewRequest {
        rating,
        title: title.to_string(),
        body: "Cooks in five minutes.".to_string(),
    }
}

async fn write(
    state: &AppState,
    author: &User,
    slug: &str,
    request: &CreateReviewRequest,
) -> Result<Review, AppError> {
    reviews::create(state.pool(), state.catalog(), author, slug, request).await
}

/// Place an order for the variant and mark it paid.
async fn buy(state: &AppState, buyer: &User, variant_id: VariantId) {
    cart::set_item(
        state.pool(),
        &state.config().pricing,
        buyer,
        &SetItemRequest {
            variant_id,
            quantity: 1,
        },
    )
    .await
    .unwrap();
    let order = checkout::place_order(
        state.pool(),
        &state.config().pricing,
        state.config().currency,
        state.notifier(),
        buyer,
        &CheckoutRequest {
            promocode: None,
            shipping_address: address(),
        },
    )
    .await
    .unwrap();
    sqlx::query("UPDATE shop.orders SET status = 'paid' WHERE id = $1")
        .bind(order.order.id)
        .execute(state.pool())
        .await
        .unwrap();
    state.notifier().drain().await;
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_one_review_per_user_and_product(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let author = user(&pool, "ada@example.org", UserRole::Customer).await;
    let other = user(&pool, "grace@example.org", UserRole::Customer).await;
    variant(&pool, "rolled-oats", Decimal::new(1000, 2), 5).await;

    let first = write(&state, &author, "rolled-oats", &review(5, "  Lovely  "))
        .await
        .unwrap();
    assert_eq!(first.title, "Lovely");
    assert!(!first.verified_purchase);

    let err = write(&state, &author, "rolled-oats", &review(2, "Changed my mind"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");

    write(&state, &other, "rolled-oats", &review(4, "Solid"))
        .await
        .unwrap();

    let err = write(&state, &other, "unknown-product", &review(4, "Solid"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "{err:?}");
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_paid_order_marks_review_verified(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let buyer = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", Decimal::new(1000, 2), 5).await;

    buy(&state, &buyer, oats.id).await;

    let verified = write(&state, &buyer, "rolled-oats", &review(5, "Lovely"))
        .await
        .unwrap();
    assert!(verified.verified_purchase);
}

#[sqlx::test(migrations = "../api/migrations")]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_unpaid_order_does_not_verify(pool: PgPool) {
    let state = state(pool.clone(), Arc::new(FakeGateway::default()));
    let buyer = user(&pool, "ada@example.org", UserRole::Customer).await;
    let oats = variant(&pool, "rolled-oats", Decimal::new(1000, 2), 5).await;

    cart::set_item(
        &pool,
        &state.config().pricing,
        &buyer,
        &SetItemRequest {
            variant_id: oats.id,
            quantity: 1,
        },
    )
    .await
    .unwrap();
    checkout::place_order(
        &pool,
        &state.config().pricing,
        state.config().currency,
        state.notifier(),
        &buyer,
        &CheckoutRequest {
            promocode: None,
            shipping_address: address(),
        },
    )
    .await
    .unwrap();

    let unverified = write(&state, &buyer, "rolled-oats", &review(3, "Fine"))
        .await
        .unwrap();
    assert!(!unverified.verified_purchase);
    state.notifier().drain().await;
}
