//! Catalog queries: products, variants, search and stock.

use larder_core::{ProductId, VariantId};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};

use super::RepositoryError;
use crate::models::{Product, RatingSummary, Variant};

const PRODUCT_COLUMNS: &str = "id, slug, title, description, is_active, created_at, updated_at";
const VARIANT_COLUMNS: &str =
    "id, product_id, sku, title, price, stock, is_active, created_at, updated_at";

/// Fields for a new product.
#[derive(Debug, Clone)]
pub struct NewProduct<'a> {
    pub slug: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub is_active: bool,
}

/// Partial product update; `None` leaves a column unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Fields for a new variant.
#[derive(Debug, Clone)]
pub struct NewVariant<'a> {
    pub sku: &'a str,
    pub title: &'a str,
    pub price: Decimal,
    pub stock: i32,
}

/// Partial variant update; `None` leaves a column unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariantChanges {
    pub price: Option<Decimal>,
    pub stock: Option<i32>,
    pub is_active: Option<bool>,
}

/// List active products, newest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list_active(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Product>, RepositoryError> {
    let products = sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM shop.products WHERE is_active \
         ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(products)
}

/// Get an active product by slug.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get_active_by_slug(
    pool: &PgPool,
    slug: &str,
) -> Result<Option<Product>, RepositoryError> {
    let product = sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM shop.products WHERE slug = $1 AND is_active"
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    Ok(product)
}

/// Get any product by ID (admin).
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get_by_id(pool: &PgPool, id: ProductId) -> Result<Option<Product>, RepositoryError> {
    let product = sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM shop.products WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(product)
}

/// Active variants of a product, cheapest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn active_variants(
    pool: &PgPool,
    product_id: ProductId,
) -> Result<Vec<Variant>, RepositoryError> {
    let variants = sqlx::query_as::<_, Variant>(&format!(
        "SELECT {VARIANT_COLUMNS} FROM shop.product_variants \
         WHERE product_id = $1 AND is_active ORDER BY price, id"
    ))
    .bind(product_id)
    .fetch_all(pool)
    .await?;
    Ok(variants)
}

/// Published review count and average for a product.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn rating_summary(
    pool: &PgPool,
    product_id: ProductId,
) -> Result<RatingSummary, RepositoryError> {
    let summary = sqlx::query_as::<_, RatingSummary>(
        "SELECT COUNT(*) AS count, ROUND(AVG(rating), 2) AS average \
         FROM shop.reviews WHERE product_id = $1 AND is_published",
    )
    .bind(product_id)
    .fetch_one(pool)
    .await?;
    Ok(summary)
}

/// Case-insensitive search over active product titles and descriptions.
///
/// Title matches rank above description-only matches.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn search(
    pool: &PgPool,
    query: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Product>, RepositoryError> {
    let pattern = format!("%{}%", escape_like(query));
    let products = sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM shop.products \
         WHERE is_active AND (title ILIKE $1 ESCAPE '\\' OR description ILIKE $1 ESCAPE '\\') \
         ORDER BY (title ILIKE $1 ESCAPE '\\') DESC, title, id \
         LIMIT $2 OFFSET $3"
    ))
    .bind(pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(products)
}

/// Escape `%`, `_` and `\` so user input matches literally inside `ILIKE`.
#[must_use]
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// =============================================================================
// Admin writes
// =============================================================================

/// Create a product.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the slug is taken.
pub async fn create(pool: &PgPool, new: NewProduct<'_>) -> Result<Product, RepositoryError> {
    sqlx::query_as::<_, Product>(&format!(
        "INSERT INTO shop.products (slug, title, description, is_active) \
         VALUES ($1, $2, $3, $4) RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(new.slug)
    .bind(new.title)
    .bind(new.description)
    .bind(new.is_active)
    .fetch_one(pool)
    .await
    .map_err(|e| RepositoryError::conflict_on_unique(e, format!("slug '{}' is taken", new.slug)))
}

/// Apply a partial update to a product.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the product does not exist.
pub async fn update(
    pool: &PgPool,
    id: ProductId,
    changes: &ProductChanges,
) -> Result<Product, RepositoryError> {
    sqlx::query_as::<_, Product>(&format!(
        "UPDATE shop.products SET \
             title = COALESCE($2, title), \
             description = COALESCE($3, description), \
             is_active = COALESCE($4, is_active), \
             updated_at = NOW() \
         WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(id)
    .bind(changes.title.as_deref())
    .bind(changes.description.as_deref())
    .bind(changes.is_active)
    .fetch_optional(pool)
    .await?
    .ok_or(RepositoryError::NotFound)
}

/// Add a variant to a product.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the SKU is taken.
pub async fn create_variant(
    pool: &PgPool,
    product_id: ProductId,
    new: NewVariant<'_>,
) -> Result<Variant, RepositoryError> {
    sqlx::query_as::<_, Variant>(&format!(
        "INSERT INTO shop.product_variants (product_id, sku, title, price, stock) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {VARIANT_COLUMNS}"
    ))
    .bind(product_id)
    .bind(new.sku)
    .bind(new.title)
    .bind(new.price)
    .bind(new.stock)
    .fetch_one(pool)
    .await
    .map_err(|e| RepositoryError::conflict_on_unique(e, format!("sku '{}' is taken", new.sku)))
}

/// Apply a partial update to a variant.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the variant does not exist.
pub async fn update_variant(
    pool: &PgPool,
    id: VariantId,
    changes: &VariantChanges,
) -> Result<Variant, RepositoryError> {
    sqlx::query_as::<_, Variant>(&format!(
        "UPDATE shop.product_variants SET \
             price = COALESCE($2, price), \
             stock = COALESCE($3, stock), \
             is_active = COALESCE($4, is_active), \
             updated_at = NOW() \
         WHERE id = $1 RETURNING {VARIANT_COLUMNS}"
    ))
    .bind(id)
    .bind(changes.price)
    .bind(changes.stock)
    .bind(changes.is_active)
    .fetch_optional(pool)
    .await?
    .ok_or(RepositoryError::NotFound)
}

// =============================================================================
// Stock (inside a transaction)
// =============================================================================

/// A variant row locked for a stock change, joined with its product.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LockedVariant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub product_title: String,
    pub title: String,
    pub sku: String,
    pub price: Decimal,
    pub stock: i32,
    /// Variant and product are both active.
    pub purchasable: bool,
}

/// Lock the given variants `FOR UPDATE` in ID order.
///
/// Always locking in the same order keeps two checkouts that share variants
/// from deadlocking.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lock_variants(
    conn: &mut PgConnection,
    ids: &[VariantId],
) -> Result<Vec<LockedVariant>, RepositoryError> {
    let rows = sqlx::query_as::<_, LockedVariant>(
        "SELECT v.id, v.product_id, p.title AS product_title, v.title, v.sku, v.price, v.stock, \
                (v.is_active AND p.is_active) AS purchasable \
         FROM shop.product_variants v \
         JOIN shop.products p ON p.id = v.product_id \
         WHERE v.id = ANY($1) \
         ORDER BY v.id \
         FOR UPDATE OF v",
    )
    .bind(ids)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Change a variant's stock by `delta`. The table's `stock >= 0` check
/// rejects oversells that slip past the caller's own check.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the update fails.
pub async fn adjust_stock(
    conn: &mut PgConnection,
    id: VariantId,
    delta: i32,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE shop.product_variants SET stock = stock + $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(delta)
    .execute(conn)
    .await?;
    Ok(())
}

/// Current prices for a set of variants, for quoting without locks.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn variants_for_pricing(
    pool: &PgPool,
    ids: &[VariantId],
) -> Result<Vec<LockedVariant>, RepositoryError> {
    let rows = sqlx::query_as::<_, LockedVariant>(
        "SELECT v.id, v.product_id, p.title AS product_title, v.title, v.sku, v.price, v.stock, \
                (v.is_active AND p.is_active) AS purchasable \
         FROM shop.product_variants v \
         JOIN shop.products p ON p.id = v.product_id \
         WHERE v.id = ANY($1) \
         ORDER BY v.id",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Slug of the product that owns a variant.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn slug_for_variant(
    pool: &PgPool,
    id: VariantId,
) -> Result<Option<String>, RepositoryError> {
    let slug = sqlx::query_scalar::<_, String>(
        "SELECT p.slug FROM shop.products p \
         JOIN shop.product_variants v ON v.product_id = p.id WHERE v.id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain"), "plain");
    }
}
