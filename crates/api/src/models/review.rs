use chrono::{DateTime, Utc};
use larder_core::{ProductId, ReviewId, UserId};
use serde::Serialize;

/// A product review with its author's display name.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Review {
    pub id: ReviewId,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub author_name: String,
    pub rating: i16,
    pub title: String,
    pub body: String,
    /// The author has a paid order containing this product.
    pub verified_purchase: bool,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}
