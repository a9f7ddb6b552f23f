//! Cart operations.

use larder_core::{
    Adjustments, CostBreakdown, PricedLine, PricingPolicy, VariantId, compute_breakdown,
    round_money,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::db::{carts, products};
use crate::error::AppError;
use crate::models::{CartLine, CartView, User};

/// Largest quantity of one variant a cart line may hold.
pub const MAX_QUANTITY: i32 = 99;

#[derive(Debug, Deserialize)]
pub struct SetItemRequest {
    pub variant_id: VariantId,
    pub quantity: i32,
}

/// Subtotal of the purchasable lines, or `None` if there are none.
#[must_use]
pub fn subtotal(lines: &[CartLine]) -> Option<Decimal> {
    let mut purchasable = lines.iter().filter(|l| l.purchasable).peekable();
    purchasable.peek()?;
    Some(
        purchasable
            .map(|l| round_money(l.unit_price * Decimal::from(l.quantity)))
            .sum(),
    )
}

/// Preview breakdown over the purchasable lines, or `None` if there are none.
///
/// # Errors
///
/// Returns `AppError::Pricing` if the shop's pricing policy is invalid.
pub fn preview(
    lines: &[CartLine],
    policy: &PricingPolicy,
    loyalty_rate: Decimal,
    promocode_discount: Decimal,
) -> Result<Option<CostBreakdown>, AppError> {
    let priced: Vec<PricedLine> = lines
        .iter()
        .filter(|l| l.purchasable)
        .map(CartLine::priced)
        .collect();
    if priced.is_empty() {
        return Ok(None);
    }
    let breakdown = compute_breakdown(
        &priced,
        policy,
        Adjustments {
            loyalty_rate,
            promocode_discount,
        },
    )?;
    Ok(Some(breakdown))
}

/// The user's cart with its preview breakdown.
///
/// # Errors
///
/// Returns `AppError` if the query or pricing fails.
#[instrument(skip(pool, policy, user), fields(user_id = %user.id))]
pub async fn view(pool: &PgPool, policy: &PricingPolicy, user: &User) -> Result<CartView, AppError> {
    let lines = carts::lines(pool, user.id).await?;
    let breakdown = preview(&lines, policy, user.loyalty_rate, Decimal::ZERO)?;
    Ok(CartView { lines, breakdown })
}

/// Set a line's quantity. Zero removes it.
///
/// # Errors
///
/// Returns `AppError::Validation` for an out-of-range quantity,
/// `AppError::NotFound` for an unknown variant and `AppError::Conflict` for
/// a variant that cannot be bought.
#[instrument(skip(pool, policy, user), fields(user_id = %user.id))]
pub async fn set_item(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    request: &SetItemRequest,
) -> Result<CartView, AppError> {
    check_quantity(request.quantity)?;

    if request.quantity > 0 {
        let variant = products::variants_for_pricing(pool, &[request.variant_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("variant".to_string()))?;
        if !variant.purchasable {
            return Err(AppError::Conflict(format!(
                "{} is not available",
                variant.sku
            )));
        }
    }

    carts::set_quantity(pool, user.id, request.variant_id, request.quantity).await?;
    debug!(variant_id = %request.variant_id, quantity = request.quantity, "Cart line set");
    view(pool, policy, user).await
}

/// Remove a line.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the variant is not in the cart.
pub async fn remove_item(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    variant_id: VariantId,
) -> Result<CartView, AppError> {
    carts::remove_item(pool, user.id, variant_id)
        .await
        .map_err(|e| match e {
            crate::db::RepositoryError::NotFound => AppError::NotFound("cart item".to_string()),
            other => other.into(),
        })?;
    view(pool, policy, user).await
}

/// Empty the cart.
///
/// # Errors
///
/// Returns `AppError::Database` if the delete fails.
pub async fn clear(pool: &PgPool, user: &User) -> Result<(), AppError> {
    let mut conn = pool.acquire().await?;
    carts::clear(&mut conn, user.id).await?;
    Ok(())
}

fn check_quantity(quantity: i32) -> Result<(), AppError> {
    if !(0..=MAX_QUANTITY).contains(&quantity) {
        return Err(AppError::Validation(format!(
            "quantity must be between 0 and {MAX_QUANTITY}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use larder_core::ProductId;

    use super::*;

    fn line(id: i32, price: i64, quantity: i32, purchasable: bool) -> CartLine {
        CartLine {
            variant_id: VariantId::new(id),
            product_id: ProductId::new(1),
            product_title: "Jasmine Rice".to_string(),
            variant_title: "2kg".to_string(),
            sku: format!("RICE-{id}"),
            unit_price: Decimal::new(price, 2),
            quantity,
            stock: 50,
            purchasable,
        }
    }

    #[test]
    fn test_quantity_bounds() {
        assert!(check_quantity(0).is_ok());
        assert!(check_quantity(99).is_ok());
        assert!(check_quantity(100).is_err());
        assert!(check_quantity(-1).is_err());
    }

    #[test]
    fn test_preview_ignores_unavailable_lines() {
        let lines = [line(1, 1000, 2, true), line(2, 5000, 1, false)];
        let breakdown = preview(&lines, &PricingPolicy::default(), Decimal::ZERO, Decimal::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(breakdown.subtotal, Decimal::new(2000, 2));
        assert_eq!(breakdown.lines.len(), 1);
        assert!(breakdown.verify());
    }

    #[test]
    fn test_subtotal() {
        let lines = [line(1, 333, 3, true), line(2, 5000, 1, false)];
        assert_eq!(subtotal(&lines), Some(Decimal::new(999, 2)));
        assert_eq!(subtotal(&lines[1..]), None);
    }

    #[test]
    fn test_preview_empty_cart() {
        let lines = [line(2, 5000, 1, false)];
        assert!(
            preview(&lines, &PricingPolicy::default(), Decimal::ZERO, Decimal::ZERO)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_preview_applies_loyalty() {
        let lines = [line(1, 10_000, 1, true)];
        let breakdown = preview(&lines, &PricingPolicy::default(), Decimal::new(10, 2), Decimal::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(breakdown.discount, Decimal::new(1000, 2));
    }
}
