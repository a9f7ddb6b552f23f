//! Product reviews.

use larder_core::ReviewId;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{info, instrument};

use super::catalog::CatalogCache;
use crate::db::{self, orders, products, reviews};
use crate::error::AppError;
use crate::models::{Product, Review, User};

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub rating: i16,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl CreateReviewRequest {
    fn validate(&self) -> Result<(), AppError> {
        if !(1..=5).contains(&self.rating) {
            return Err(AppError::Validation("rating must be between 1 and 5".to_string()));
        }
        let title = self.title.trim().chars().count();
        if title == 0 || title > 120 {
            return Err(AppError::Validation(
                "title must be between 1 and 120 characters".to_string(),
            ));
        }
        if self.body.chars().count() > 5000 {
            return Err(AppError::Validation(
                "body must be at most 5000 characters".to_string(),
            ));
        }
        Ok(())
    }
}

async fn product(pool: &PgPool, slug: &str) -> Result<Product, AppError> {
    products::get_active_by_slug(pool, slug)
        .await?
        .ok_or_else(|| AppError::NotFound("product".to_string()))
}

/// Published reviews for a product, newest first.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown product.
pub async fn list(
    pool: &PgPool,
    slug: &str,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Vec<Review>, AppError> {
    let product = product(pool, slug).await?;
    let (limit, offset) = db::page(limit, offset);
    Ok(reviews::list_published(pool, product.id, limit, offset).await?)
}

/// Review a product. Marked verified when the user has bought it.
///
/// # Errors
///
/// Returns `AppError::Validation` for bad input and `AppError::Conflict` if
/// the user already reviewed the product.
#[instrument(skip(pool, cache, user, request), fields(user_id = %user.id))]
pub async fn create(
    pool: &PgPool,
    cache: &CatalogCache,
    user: &User,
    slug: &str,
    request: &CreateReviewRequest,
) -> Result<Review, AppError> {
    request.validate()?;
    let product = product(pool, slug).await?;
    let verified_purchase = orders::has_purchased_product(pool, user.id, product.id).await?;

    let review = reviews::create(
        pool,
        reviews::NewReview {
            product_id: product.id,
            user_id: user.id,
            rating: request.rating,
            title: request.title.trim(),
            body: request.body.trim(),
            verified_purchase,
        },
    )
    .await?;
    cache.invalidate();
    info!(review_id = %review.id, product_id = %product.id, verified_purchase, "Review created");
    Ok(review)
}

/// Delete one of the caller's reviews.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the review does not exist or is not theirs.
pub async fn delete_own(
    pool: &PgPool,
    cache: &CatalogCache,
    user: &User,
    id: ReviewId,
) -> Result<(), AppError> {
    let review = reviews::get(pool, id)
        .await?
        .filter(|r| r.user_id == user.id)
        .ok_or_else(|| AppError::NotFound("review".to_string()))?;
    reviews::delete(pool, review.id).await?;
    cache.invalidate();
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ModerationRequest {
    pub is_published: bool,
}

/// Publish or hide a review.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the review does not exist.
pub async fn set_published(
    pool: &PgPool,
    cache: &CatalogCache,
    id: ReviewId,
    is_published: bool,
) -> Result<Review, AppError> {
    let review = reviews::set_published(pool, id, is_published).await?;
    cache.invalidate();
    info!(review_id = %id, is_published, "Review moderated");
    Ok(review)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(rating: i16, title: &str, body: &str) -> CreateReviewRequest {
        CreateReviewRequest {
            rating,
            title: title.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_review_validation() {
        assert!(request(5, "Great oats", "Creamy.").validate().is_ok());
        assert!(request(0, "Bad", "").validate().is_err());
        assert!(request(6, "Too good", "").validate().is_err());
        assert!(request(3, "  ", "").validate().is_err());
        assert!(request(3, &"t".repeat(121), "").validate().is_err());
        assert!(request(3, "Long", &"b".repeat(5001)).validate().is_err());
    }
}
