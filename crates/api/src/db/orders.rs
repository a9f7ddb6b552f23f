//! Order and order item queries.

use larder_core::{
    CostBreakdown, CurrencyCode, OrderId, OrderStatus, PromocodeId, SubscriptionId, UserId,
    VariantId,
};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use super::RepositoryError;
use crate::models::{Order, OrderItem, ShippingAddress};

const ORDER_COLUMNS: &str = "id, user_id, subscription_id, status, currency, subtotal, admin_fee, \
     delivery_fee, tax, discount, total, promocode_id, shipping_address, metadata, \
     created_at, updated_at";

/// Everything needed to insert an order row.
#[derive(Debug, Clone)]
pub struct NewOrder<'a> {
    pub user_id: UserId,
    pub subscription_id: Option<SubscriptionId>,
    pub currency: CurrencyCode,
    pub breakdown: &'a CostBreakdown,
    pub promocode_id: Option<PromocodeId>,
    pub shipping_address: &'a ShippingAddress,
    pub metadata: serde_json::Value,
}

/// Copy of a variant's title, SKU and price at purchase time.
#[derive(Debug, Clone)]
pub struct NewOrderItem<'a> {
    pub variant_id: VariantId,
    pub product_title: &'a str,
    pub variant_title: &'a str,
    pub sku: &'a str,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// Insert a pending order with its breakdown.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails, including when
/// the breakdown violates the `orders_total_identity` check.
pub async fn insert(conn: &mut PgConnection, new: NewOrder<'_>) -> Result<Order, RepositoryError> {
    let b = new.breakdown;
    let order = sqlx::query_as::<_, Order>(&format!(
        "INSERT INTO shop.orders (user_id, subscription_id, status, currency, subtotal, admin_fee, \
             delivery_fee, tax, discount, total, promocode_id, shipping_address, metadata) \
         VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING {ORDER_COLUMNS}"
    ))
    .bind(new.user_id)
    .bind(new.subscription_id)
    .bind(new.currency)
    .bind(b.subtotal)
    .bind(b.admin_fee)
    .bind(b.delivery_fee)
    .bind(b.tax)
    .bind(b.discount)
    .bind(b.total)
    .bind(new.promocode_id)
    .bind(Json(new.shipping_address))
    .bind(Json(new.metadata))
    .fetch_one(conn)
    .await?;
    Ok(order)
}

/// Insert the order's line items.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if an insert fails.
pub async fn insert_items(
    conn: &mut PgConnection,
    order_id: OrderId,
    items: &[NewOrderItem<'_>],
) -> Result<(), RepositoryError> {
    for item in items {
        sqlx::query(
            "INSERT INTO shop.order_items \
                 (order_id, variant_id, product_title, variant_title, sku, unit_price, quantity, line_total) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(order_id)
        .bind(item.variant_id)
        .bind(item.product_title)
        .bind(item.variant_title)
        .bind(item.sku)
        .bind(item.unit_price)
        .bind(item.quantity)
        .bind(item.line_total)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Get an order by ID.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get(pool: &PgPool, id: OrderId) -> Result<Option<Order>, RepositoryError> {
    let order = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM shop.orders WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(order)
}

/// Lock an order row for a status change.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lock(conn: &mut PgConnection, id: OrderId) -> Result<Option<Order>, RepositoryError> {
    let order = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM shop.orders WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Line items of an order.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn items<'e, E>(executor: E, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    let items = sqlx::query_as::<_, OrderItem>(
        "SELECT id, order_id, variant_id, product_title, variant_title, sku, unit_price, \
                quantity, line_total \
         FROM shop.order_items WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(executor)
    .await?;
    Ok(items)
}

/// A user's orders, newest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list_for_user(
    pool: &PgPool,
    user_id: UserId,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>, RepositoryError> {
    let orders = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM shop.orders WHERE user_id = $1 \
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(orders)
}

/// All orders, optionally filtered by status, newest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list_all(
    pool: &PgPool,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>, RepositoryError> {
    let orders = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM shop.orders WHERE ($1::shop.order_status IS NULL OR status = $1) \
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(orders)
}

/// Write a new status. Callers validate the transition first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the update fails.
pub async fn set_status(
    conn: &mut PgConnection,
    id: OrderId,
    status: OrderStatus,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE shop.orders SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status)
        .execute(conn)
        .await?;
    Ok(())
}

/// Whether the user has a paid (or later) order containing the product.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn has_purchased_product(
    pool: &PgPool,
    user_id: UserId,
    product_id: larder_core::ProductId,
) -> Result<bool, RepositoryError> {
    let found = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS ( \
             SELECT 1 FROM shop.orders o \
             JOIN shop.order_items oi ON oi.order_id = o.id \
             JOIN shop.product_variants v ON v.id = oi.variant_id \
             WHERE o.user_id = $1 AND v.product_id = $2 \
               AND o.status IN ('paid', 'fulfilled', 'delivered'))",
    )
    .bind(user_id)
    .bind(product_id)
    .fetch_one(pool)
    .await?;
    Ok(found)
}
