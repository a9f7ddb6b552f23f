//! Database operations for the shop `PostgreSQL` schema.
//!
//! # Schema: `shop`
//!
//! ## Tables
//!
//! - `users`, `api_tokens` - Accounts and hashed bearer tokens
//! - `products`, `product_variants` - Catalog and stock
//! - `carts`, `cart_items` - One cart per user
//! - `orders`, `order_items` - Orders with their stored cost breakdown
//! - `payment_intents`, `transactions` - Gateway attempts and money movements
//! - `subscriptions`, `subscription_items` - Recurring orders with pricing snapshots
//! - `promocodes`, `promocode_redemptions`
//! - `reviews`, `contact_messages`
//! - `notification_preferences`, `notification_log`
//!
//! # Migrations
//!
//! Migrations are stored in `crates/api/migrations/` and run via:
//! ```bash
//! cargo run -p larder-cli -- migrate
//! ```
//!
//! Queries are built at runtime with `sqlx::query_as::<_, T>` so the crate
//! compiles without a live database.

pub mod carts;
pub mod contact_messages;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod products;
pub mod promocodes;
pub mod reviews;
pub mod subscriptions;
pub mod users;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use users::UserRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate slug).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Turn a unique-constraint failure into `Conflict` with the given message.
    pub(crate) fn conflict_on_unique(err: sqlx::Error, message: impl Into<String>) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::Conflict(message.into());
        }
        Self::Database(err)
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Clamp client-supplied pagination to `limit` in 1..=100 (default 20) and a
/// non-negative offset.
#[must_use]
pub fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(20).clamp(1, 100),
        offset.unwrap_or(0).max(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_defaults_and_clamps() {
        assert_eq!(page(None, None), (20, 0));
        assert_eq!(page(Some(500), Some(-3)), (100, 0));
        assert_eq!(page(Some(0), Some(40)), (1, 40));
    }
}
