//! Product reviews.

use larder_core::{ProductId, ReviewId, UserId};
use sqlx::PgPool;

use super::RepositoryError;
use crate::models::Review;

const REVIEW_SELECT: &str = "\
    SELECT r.id, r.product_id, r.user_id, u.name AS author_name, r.rating, r.title, r.body, \
           r.verified_purchase, r.is_published, r.created_at \
    FROM shop.reviews r JOIN shop.users u ON u.id = r.user_id";

/// Fields for a new review.
#[derive(Debug, Clone)]
pub struct NewReview<'a> {
    pub product_id: ProductId,
    pub user_id: UserId,
    pub rating: i16,
    pub title: &'a str,
    pub body: &'a str,
    pub verified_purchase: bool,
}

/// Published reviews for a product, newest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list_published(
    pool: &PgPool,
    product_id: ProductId,
    limit: i64,
    offset: i64,
) -> Result<Vec<Review>, RepositoryError> {
    let reviews = sqlx::query_as::<_, Review>(&format!(
        "{REVIEW_SELECT} WHERE r.product_id = $1 AND r.is_published \
         ORDER BY r.created_at DESC, r.id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(product_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(reviews)
}

/// Every review, including hidden ones, for moderation.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list_all(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Review>, RepositoryError> {
    let reviews = sqlx::query_as::<_, Review>(&format!(
        "{REVIEW_SELECT} ORDER BY r.created_at DESC, r.id DESC LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(reviews)
}

/// Insert a review. One review per user per product.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the user already reviewed the product.
pub async fn create(pool: &PgPool, new: NewReview<'_>) -> Result<Review, RepositoryError> {
    let id: ReviewId = sqlx::query_scalar(
        "INSERT INTO shop.reviews (product_id, user_id, rating, title, body, verified_purchase) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
    )
    .bind(new.product_id)
    .bind(new.user_id)
    .bind(new.rating)
    .bind(new.title)
    .bind(new.body)
    .bind(new.verified_purchase)
    .fetch_one(pool)
    .await
    .map_err(|e| RepositoryError::conflict_on_unique(e, "product already reviewed"))?;

    get(pool, id).await?.ok_or(RepositoryError::NotFound)
}

/// Get a review by ID.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get(pool: &PgPool, id: ReviewId) -> Result<Option<Review>, RepositoryError> {
    let review = sqlx::query_as::<_, Review>(&format!("{REVIEW_SELECT} WHERE r.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(review)
}

/// Publish or hide a review.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the review does not exist.
pub async fn set_published(
    pool: &PgPool,
    id: ReviewId,
    is_published: bool,
) -> Result<Review, RepositoryError> {
    let result = sqlx::query("UPDATE shop.reviews SET is_published = $2 WHERE id = $1")
        .bind(id)
        .bind(is_published)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }
    get(pool, id).await?.ok_or(RepositoryError::NotFound)
}

/// Delete a review.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the review does not exist.
pub async fn delete(pool: &PgPool, id: ReviewId) -> Result<(), RepositoryError> {
    let result = sqlx::query("DELETE FROM shop.reviews WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}
