//! Accounts and API tokens.

use chrono::{DateTime, Utc};
use larder_core::{ApiTokenId, Email, UserId, UserRole};
use rust_decimal::Decimal;
use serde::Serialize;

/// A shop account. Also the authenticated principal for a request.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub name: String,
    pub role: UserRole,
    /// Loyalty discount as a fraction of the subtotal.
    pub loyalty_rate: Decimal,
    /// Gateway customer that owns saved payment methods.
    #[serde(skip_serializing)]
    pub gateway_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Metadata for an issued bearer token. The token itself is never stored.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiToken {
    pub id: ApiTokenId,
    pub user_id: UserId,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}
