//! Quotes and order placement.
//!
//! `place_order` runs in one transaction: the cart's variants are locked in
//! ID order, stock is checked and decremented, the promocode row is locked and
//! redeemed, and the cart is cleared. Either all of it commits or none of it.

use chrono::Utc;
use larder_core::{
    Adjustments, CostBreakdown, CurrencyCode, PricedLine, PricingPolicy, VariantId,
    compute_breakdown, round_money,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, instrument};

use super::notifications::{Notice, NoticeItem, Notifier};
use super::{cart, promocodes as promo};
use crate::db::products::{self, LockedVariant};
use crate::db::{carts, orders, promocodes};
use crate::error::AppError;
use crate::models::{CartLine, OrderDetail, ShippingAddress, User};

#[derive(Debug, Default, Deserialize)]
pub struct QuoteRequest {
    #[serde(default)]
    pub promocode: Option<String>,
}

/// A priced cart with no side effects.
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub lines: Vec<CartLine>,
    pub promocode: Option<String>,
    pub breakdown: CostBreakdown,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub promocode: Option<String>,
    pub shipping_address: ShippingAddress,
}

/// Price the cart with an optional promocode.
///
/// # Errors
///
/// Returns `AppError::Validation` for an empty cart and `AppError::Promocode`
/// if the code does not apply.
#[instrument(skip(pool, policy, user, request), fields(user_id = %user.id))]
pub async fn quote(
    pool: &PgPool,
    policy: &PricingPolicy,
    user: &User,
    request: &QuoteRequest,
) -> Result<Quote, AppError> {
    let lines = carts::lines(pool, user.id).await?;
    let subtotal = cart::subtotal(&lines).ok_or_else(empty_cart)?;

    let (code, discount) = match request.promocode.as_deref() {
        Some(raw) => {
            let (promocode, discount) =
                promo::evaluate(pool, raw, user.id, subtotal, Utc::now()).await?;
            (Some(promocode.code), discount)
        }
        None => (None, Decimal::ZERO),
    };

    let breakdown =
        cart::preview(&lines, policy, user.loyalty_rate, discount)?.ok_or_else(empty_cart)?;
    Ok(Quote {
        lines,
        promocode: code,
        breakdown,
    })
}

/// A cart line matched with its locked variant.
#[derive(Debug)]
struct Reserved<'a> {
    variant: &'a LockedVariant,
    quantity: i32,
}

/// Match every cart line to a purchasable, sufficiently stocked variant.
fn reserve<'a>(
    lines: &[CartLine],
    locked: &'a [LockedVariant],
) -> Result<Vec<Reserved<'a>>, AppError> {
    lines
        .iter()
        .map(|line| {
            let variant = locked
                .iter()
                .find(|v| v.id == line.variant_id && v.purchasable)
                .ok_or_else(|| {
                    AppError::Conflict(format!("{} is no longer available", line.sku))
                })?;
            if variant.stock < line.quantity {
                return Err(AppError::Conflict(format!(
                    "only {} left of {}",
                    variant.stock, variant.sku
                )));
            }
            Ok(Reserved {
                variant,
                quantity: line.quantity,
            })
        })
        .collect()
}

/// Turn the cart into a pending order.
///
/// # Errors
///
/// Returns `AppError::Validation` for an empty cart or bad address,
/// `AppError::Conflict` for unavailable items, short stock or an exhausted
/// promocode, and `AppError::Promocode` if the code does not apply.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn place_order(
    pool: &PgPool,
    policy: &PricingPolicy,
    currency: CurrencyCode,
    notifier: &Notifier,
    user: &User,
    request: &CheckoutRequest,
) -> Result<OrderDetail, AppError> {
    request
        .shipping_address
        .validate()
        .map_err(AppError::Validation)?;

    let mut tx = pool.begin().await?;
    let lines = carts::lines_in(&mut tx, user.id).await?;
    if lines.is_empty() {
        return Err(empty_cart());
    }

    let mut ids: Vec<VariantId> = lines.iter().map(|l| l.variant_id).collect();
    ids.sort_unstable();
    let locked = products::lock_variants(&mut tx, &ids).await?;
    let reserved = reserve(&lines, &locked)?;

    let priced: Vec<PricedLine> = reserved
        .iter()
        .map(|r| PricedLine {
            variant_id: r.variant.id,
            unit_price: r.variant.price,
            quantity: r.quantity,
        })
        .collect();
    let subtotal: Decimal = priced
        .iter()
        .map(|l| round_money(l.unit_price * Decimal::from(l.quantity)))
        .sum();

    let applied = match request.promocode.as_deref() {
        Some(raw) => Some(promo::evaluate_locked(&mut tx, raw, user.id, subtotal, Utc::now()).await?),
        None => None,
    };
    let discount = applied.as_ref().map_or(Decimal::ZERO, |(_, d)| *d);

    let adjustments = Adjustments {
        loyalty_rate: user.loyalty_rate,
        promocode_discount: discount,
    };
    let breakdown = compute_breakdown(&priced, policy, adjustments)?;

    let order = orders::insert(
        &mut tx,
        orders::NewOrder {
            user_id: user.id,
            subscription_id: None,
            currency,
            breakdown: &breakdown,
            promocode_id: applied.as_ref().map(|(p, _)| p.id),
            shipping_address: &request.shipping_address,
            metadata: serde_json::json!({ "source": "checkout" }),
        },
    )
    .await?;

    let new_items: Vec<orders::NewOrderItem<'_>> = reserved
        .iter()
        .zip(&breakdown.lines)
        .map(|(r, total)| orders::NewOrderItem {
            variant_id: r.variant.id,
            product_title: &r.variant.product_title,
            variant_title: &r.variant.title,
            sku: &r.variant.sku,
            unit_price: r.variant.price,
            quantity: r.quantity,
            line_total: total.line_total,
        })
        .collect();
    orders::insert_items(&mut tx, order.id, &new_items).await?;
    for r in &reserved {
        products::adjust_stock(&mut tx, r.variant.id, -r.quantity).await?;
    }

    if let Some((promocode, _)) = &applied {
        let share = breakdown.promocode_share(&adjustments);
        promocodes::redeem(&mut tx, promocode.id, user.id, order.id, share).await?;
    }
    carts::clear(&mut tx, user.id).await?;
    let items = orders::items(&mut *tx, order.id).await?;
    tx.commit().await?;

    info!(order_id = %order.id, total = %order.total, "Order placed");
    notifier.send(
        user.id,
        Notice::OrderConfirmation {
            order_id: order.id,
            total: order.total,
            currency: order.currency,
            items: items
                .iter()
                .map(|i| NoticeItem {
                    title: format!("{} ({})", i.product_title, i.variant_title),
                    quantity: i.quantity,
                    line_total: i.line_total,
                })
                .collect(),
        },
    );

    Ok(OrderDetail {
        order,
        items,
        payments: Vec::new(),
        transactions: Vec::new(),
    })
}

fn empty_cart() -> AppError {
    AppError::Validation("cart is empty".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use larder_core::ProductId;

    use super::*;

    fn cart_line(id: i32, quantity: i32) -> CartLine {
        CartLine {
            variant_id: VariantId::new(id),
            product_id: ProductId::new(1),
            product_title: "Olive Oil".to_string(),
            variant_title: "500ml".to_string(),
            sku: format!("OIL-{id}"),
            unit_price: Decimal::new(899, 2),
            quantity,
            stock: 10,
            purchasable: true,
        }
    }

    fn locked(id: i32, stock: i32, purchasable: bool) -> LockedVariant {
        LockedVariant {
            id: VariantId::new(id),
            product_id: ProductId::new(1),
            product_title: "Olive Oil".to_string(),
            title: "500ml".to_string(),
            sku: format!("OIL-{id}"),
            price: Decimal::new(949, 2),
            stock,
            purchasable,
        }
    }

    #[test]
    fn test_reserve_uses_locked_rows() {
        let variants = [locked(1, 5, true), locked(2, 1, true)];
        let reserved = reserve(&[cart_line(1, 2), cart_line(2, 1)], &variants).unwrap();
        assert_eq!(reserved.len(), 2);
        assert_eq!(reserved[0].variant.price, Decimal::new(949, 2));
    }

    #[test]
    fn test_reserve_rejects_short_stock() {
        let variants = [locked(1, 1, true)];
        let err = reserve(&[cart_line(1, 2)], &variants).unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg == "only 1 left of OIL-1"));
    }

    #[test]
    fn test_reserve_rejects_inactive_or_missing() {
        let variants = [locked(1, 5, false)];
        assert!(matches!(
            reserve(&[cart_line(1, 1)], &variants),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            reserve(&[cart_line(3, 1)], &variants),
            Err(AppError::Conflict(_))
        ));
    }
}
