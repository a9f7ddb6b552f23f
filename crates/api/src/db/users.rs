//! User and API token repository.

use larder_core::{ApiTokenId, Email, UserId, UserRole};
use rust_decimal::Decimal;
use sqlx::PgPool;

use super::RepositoryError;
use crate::models::{ApiToken, User};

const USER_COLUMNS: &str = "u.id, u.email, u.name, u.role, u.loyalty_rate, \
     u.gateway_customer_id, u.created_at, u.updated_at";

/// Repository for users and their bearer tokens.
pub struct UserRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM shop.users u WHERE u.id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(user)
    }

    /// Get a user by email address.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM shop.users u WHERE u.email = $1"
        ))
        .bind(email)
        .fetch_optional(self.pool)
        .await?;
        Ok(user)
    }

    /// Create a user.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the email is taken.
    pub async fn create(
        &self,
        email: &Email,
        name: &str,
        role: UserRole,
    ) -> Result<User, RepositoryError> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO shop.users AS u (email, name, role) VALUES ($1, $2, $3) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(email)
        .bind(name)
        .bind(role)
        .fetch_one(self.pool)
        .await
        .map_err(|e| RepositoryError::conflict_on_unique(e, format!("user {email} already exists")))
    }

    /// Set a user's loyalty discount rate.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the user does not exist.
    pub async fn set_loyalty_rate(&self, id: UserId, rate: Decimal) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE shop.users SET loyalty_rate = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(rate)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// Resolve a token hash to its (non-revoked) owner and record the use.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn authenticate(&self, token_hash: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE shop.api_tokens t SET last_used_at = NOW() \
             FROM shop.users u \
             WHERE t.token_hash = $1 AND t.revoked_at IS NULL AND u.id = t.user_id \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(token_hash)
        .fetch_optional(self.pool)
        .await?;
        Ok(user)
    }

    /// Store a new token hash.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn insert_token(
        &self,
        user_id: UserId,
        token_hash: &str,
        label: Option<&str>,
    ) -> Result<ApiToken, RepositoryError> {
        let token = sqlx::query_as::<_, ApiToken>(
            "INSERT INTO shop.api_tokens (user_id, token_hash, label) VALUES ($1, $2, $3) \
             RETURNING id, user_id, label, created_at, last_used_at, revoked_at",
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(label)
        .fetch_one(self.pool)
        .await?;
        Ok(token)
    }

    /// Revoke a token.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no active token has this ID.
    pub async fn revoke_token(&self, id: ApiTokenId) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE shop.api_tokens SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
