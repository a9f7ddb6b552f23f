//! Catalog reads (cached) and admin writes.
//!
//! Product detail pages are cached in `moka` for 60 seconds. Any admin write
//! clears the cache so price and stock changes show up immediately.

use std::sync::Arc;
use std::time::Duration;

use larder_core::{ProductId, VariantId};
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::db::products::{self, NewProduct, NewVariant, ProductChanges, VariantChanges};
use crate::error::AppError;
use crate::models::{Product, ProductDetail, Variant};

/// Cached product detail by slug.
#[derive(Clone)]
pub struct CatalogCache {
    details: Cache<String, Arc<ProductDetail>>,
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl CatalogCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            details: Cache::builder()
                .max_capacity(1000)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Drop everything after a catalog write.
    pub fn invalidate(&self) {
        self.details.invalidate_all();
    }
}

/// Product detail by slug, from cache when fresh.
///
/// # Errors
///
/// Returns `AppError::NotFound` for unknown or inactive products.
#[instrument(skip(pool, cache))]
pub async fn product_detail(
    pool: &PgPool,
    cache: &CatalogCache,
    slug: &str,
) -> Result<Arc<ProductDetail>, AppError> {
    if let Some(detail) = cache.details.get(slug).await {
        debug!("Product detail cache hit");
        return Ok(detail);
    }

    let product = products::get_active_by_slug(pool, slug)
        .await?
        .ok_or_else(|| AppError::NotFound("product".to_string()))?;
    let variants = products::active_variants(pool, product.id).await?;
    let rating = products::rating_summary(pool, product.id).await?;

    let detail = Arc::new(ProductDetail {
        product,
        variants,
        rating,
    });
    cache.details.insert(slug.to_string(), detail.clone()).await;
    Ok(detail)
}

/// Validate a search query.
///
/// # Errors
///
/// Returns `AppError::Validation` for empty or over-long queries.
pub fn validate_query(q: &str) -> Result<&str, AppError> {
    let q = q.trim();
    let len = q.chars().count();
    if len == 0 || len > 100 {
        return Err(AppError::Validation(
            "q must be between 1 and 100 characters".to_string(),
        ));
    }
    Ok(q)
}

// =============================================================================
// Admin writes
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateVariantRequest {
    pub sku: String,
    pub title: String,
    pub price: Decimal,
    #[serde(default)]
    pub stock: i32,
}

/// Slugs are lowercase ASCII words joined by single hyphens.
#[must_use]
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 100
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn check_title(title: &str) -> Result<(), AppError> {
    let len = title.trim().chars().count();
    if len == 0 || len > 200 {
        return Err(AppError::Validation(
            "title must be between 1 and 200 characters".to_string(),
        ));
    }
    Ok(())
}

fn check_price_and_stock(price: Option<Decimal>, stock: Option<i32>) -> Result<(), AppError> {
    if price.is_some_and(|p| p.is_sign_negative() || p.scale() > 2) {
        return Err(AppError::Validation(
            "price must be non-negative with at most 2 decimal places".to_string(),
        ));
    }
    if stock.is_some_and(|s| s < 0) {
        return Err(AppError::Validation("stock cannot be negative".to_string()));
    }
    Ok(())
}

/// Create a product.
///
/// # Errors
///
/// Returns `AppError::Validation` for a bad slug or title and
/// `AppError::Conflict` if the slug is taken.
#[instrument(skip(pool, cache, request), fields(slug = %request.slug))]
pub async fn create_product(
    pool: &PgPool,
    cache: &CatalogCache,
    request: &CreateProductRequest,
) -> Result<Product, AppError> {
    if !is_valid_slug(&request.slug) {
        return Err(AppError::Validation(
            "slug must be lowercase letters, digits and single hyphens".to_string(),
        ));
    }
    check_title(&request.title)?;

    let product = products::create(
        pool,
        NewProduct {
            slug: &request.slug,
            title: request.title.trim(),
            description: &request.description,
            is_active: request.is_active,
        },
    )
    .await?;
    cache.invalidate();
    info!(product_id = %product.id, "Product created");
    Ok(product)
}

/// Update a product.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the product does not exist.
pub async fn update_product(
    pool: &PgPool,
    cache: &CatalogCache,
    id: ProductId,
    changes: &ProductChanges,
) -> Result<Product, AppError> {
    if let Some(title) = &changes.title {
        check_title(title)?;
    }
    let product = products::update(pool, id, changes).await?;
    cache.invalidate();
    Ok(product)
}

/// Add a variant.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown product and
/// `AppError::Conflict` if the SKU is taken.
pub async fn create_variant(
    pool: &PgPool,
    cache: &CatalogCache,
    product_id: ProductId,
    request: &CreateVariantRequest,
) -> Result<Variant, AppError> {
    check_title(&request.title)?;
    check_price_and_stock(Some(request.price), Some(request.stock))?;
    if request.sku.trim().is_empty() {
        return Err(AppError::Validation("sku is required".to_string()));
    }
    if products::get_by_id(pool, product_id).await?.is_none() {
        return Err(AppError::NotFound("product".to_string()));
    }

    let variant = products::create_variant(
        pool,
        product_id,
        NewVariant {
            sku: request.sku.trim(),
            title: request.title.trim(),
            price: request.price,
            stock: request.stock,
        },
    )
    .await?;
    cache.invalidate();
    Ok(variant)
}

/// Update a variant's price, stock or active flag.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the variant does not exist.
pub async fn update_variant(
    pool: &PgPool,
    cache: &CatalogCache,
    id: VariantId,
    changes: &VariantChanges,
) -> Result<Variant, AppError> {
    check_price_and_stock(changes.price, changes.stock)?;
    let variant = products::update_variant(pool, id, changes).await?;
    cache.invalidate();
    Ok(variant)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_rules() {
        assert!(is_valid_slug("dried-mango-200g"));
        assert!(!is_valid_slug("Dried-Mango"));
        assert!(!is_valid_slug("-mango"));
        assert!(!is_valid_slug("mango--chips"));
        assert!(!is_valid_slug(""));
    }

    #[test]
    fn test_validate_query() {
        assert_eq!(validate_query("  mango ").unwrap(), "mango");
        assert!(validate_query("   ").is_err());
        assert!(validate_query(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_price_checks() {
        assert!(check_price_and_stock(Some(Decimal::new(1999, 2)), Some(0)).is_ok());
        assert!(check_price_and_stock(Some(Decimal::new(-1, 0)), None).is_err());
        assert!(check_price_and_stock(Some(Decimal::new(19_999, 3)), None).is_err());
        assert!(check_price_and_stock(None, Some(-1)).is_err());
    }

    #[tokio::test]
    async fn test_cache_invalidate() {
        let cache = CatalogCache::default();
        let detail = Arc::new(ProductDetail {
            product: Product {
                id: ProductId::new(1),
                slug: "mango".to_string(),
                title: "Mango".to_string(),
                description: String::new(),
                is_active: true,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            },
            variants: vec![],
            rating: crate::models::RatingSummary {
                count: 0,
                average: None,
            },
        });
        cache.details.insert("mango".to_string(), detail).await;
        assert!(cache.details.get("mango").await.is_some());
        cache.invalidate();
        assert!(cache.details.get("mango").await.is_none());
    }
}
