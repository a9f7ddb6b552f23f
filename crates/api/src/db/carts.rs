//! One cart per user.

use larder_core::{UserId, VariantId};
use sqlx::{PgConnection, PgPool};

use super::RepositoryError;
use crate::models::CartLine;

const LINE_QUERY: &str = "\
    SELECT ci.variant_id, v.product_id, p.title AS product_title, v.title AS variant_title, \
           v.sku, v.price AS unit_price, ci.quantity, v.stock, \
           (v.is_active AND p.is_active) AS purchasable \
    FROM shop.carts c \
    JOIN shop.cart_items ci ON ci.cart_id = c.id \
    JOIN shop.product_variants v ON v.id = ci.variant_id \
    JOIN shop.products p ON p.id = v.product_id \
    WHERE c.user_id = $1 \
    ORDER BY ci.added_at, ci.variant_id";

/// The user's cart lines at current prices.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lines(pool: &PgPool, user_id: UserId) -> Result<Vec<CartLine>, RepositoryError> {
    let lines = sqlx::query_as::<_, CartLine>(LINE_QUERY)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(lines)
}

/// Same as [`lines`] but inside a transaction.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lines_in(
    conn: &mut PgConnection,
    user_id: UserId,
) -> Result<Vec<CartLine>, RepositoryError> {
    let lines = sqlx::query_as::<_, CartLine>(LINE_QUERY)
        .bind(user_id)
        .fetch_all(conn)
        .await?;
    Ok(lines)
}

/// Set a line's quantity, creating the cart on first use. Zero removes the line.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if a statement fails.
pub async fn set_quantity(
    pool: &PgPool,
    user_id: UserId,
    variant_id: VariantId,
    quantity: i32,
) -> Result<(), RepositoryError> {
    if quantity == 0 {
        return remove_item(pool, user_id, variant_id).await;
    }

    let mut tx = pool.begin().await?;
    let cart_id: i32 = sqlx::query_scalar(
        "INSERT INTO shop.carts (user_id) VALUES ($1) \
         ON CONFLICT (user_id) DO UPDATE SET updated_at = NOW() RETURNING id",
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO shop.cart_items (cart_id, variant_id, quantity) VALUES ($1, $2, $3) \
         ON CONFLICT (cart_id, variant_id) DO UPDATE SET quantity = EXCLUDED.quantity",
    )
    .bind(cart_id)
    .bind(variant_id)
    .bind(quantity)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Remove one line.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the line was not in the cart.
pub async fn remove_item(
    pool: &PgPool,
    user_id: UserId,
    variant_id: VariantId,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "DELETE FROM shop.cart_items ci USING shop.carts c \
         WHERE ci.cart_id = c.id AND c.user_id = $1 AND ci.variant_id = $2",
    )
    .bind(user_id)
    .bind(variant_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

/// Empty the cart.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the delete fails.
pub async fn clear(conn: &mut PgConnection, user_id: UserId) -> Result<(), RepositoryError> {
    sqlx::query(
        "DELETE FROM shop.cart_items ci USING shop.carts c \
         WHERE ci.cart_id = c.id AND c.user_id = $1",
    )
    .bind(user_id)
    .execute(conn)
    .await?;
    Ok(())
}
