//! Promocode previews and admin management.

use chrono::{DateTime, Utc};
use larder_core::{PromocodeError, PromocodeId, PromocodeKind, PromocodeRule, UserId, normalize_code};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument};

use super::cart;
use crate::db::{self, carts, promocodes};
use crate::error::AppError;
use crate::models::{Promocode, User};

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub code: String,
}

/// What a code would take off the caller's current cart.
#[derive(Debug, Clone, Serialize)]
pub struct PromocodePreview {
    pub code: String,
    pub kind: PromocodeKind,
    pub subtotal: Decimal,
    pub discount: Decimal,
}

/// Discount for `raw_code` against `subtotal`, without locking.
///
/// # Errors
///
/// Returns `AppError::Promocode` if the code is malformed, unknown or does
/// not apply.
pub async fn evaluate(
    pool: &PgPool,
    raw_code: &str,
    user_id: UserId,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<(Promocode, Decimal), AppError> {
    let code = normalize_code(raw_code)?;
    let promocode = promocodes::get_by_code(pool, &code)
        .await?
        .ok_or(PromocodeError::NotFound)?;
    let used = promocodes::redemptions_by_user(pool, promocode.id, user_id).await?;
    let discount = promocode.rule().evaluate(subtotal, used, now)?;
    Ok((promocode, discount))
}

/// Same as [`evaluate`] with the promocode row locked for redemption.
///
/// # Errors
///
/// Returns `AppError::Promocode` if the code is malformed, unknown or does
/// not apply.
pub async fn evaluate_locked(
    conn: &mut PgConnection,
    raw_code: &str,
    user_id: UserId,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<(Promocode, Decimal), AppError> {
    let code = normalize_code(raw_code)?;
    let promocode = promocodes::lock_by_code(&mut *conn, &code)
        .await?
        .ok_or(PromocodeError::NotFound)?;
    let used = promocodes::redemptions_by_user(&mut *conn, promocode.id, user_id).await?;
    let discount = promocode.rule().evaluate(subtotal, used, now)?;
    Ok((promocode, discount))
}

/// Preview a code against the caller's cart.
///
/// # Errors
///
/// Returns `AppError::Validation` for an empty cart and `AppError::Promocode`
/// if the code does not apply.
#[instrument(skip(pool, user), fields(user_id = %user.id))]
pub async fn preview(pool: &PgPool, user: &User, raw_code: &str) -> Result<PromocodePreview, AppError> {
    let lines = carts::lines(pool, user.id).await?;
    let subtotal = cart::subtotal(&lines)
        .ok_or_else(|| AppError::Validation("cart is empty".to_string()))?;

    let (promocode, discount) = evaluate(pool, raw_code, user.id, subtotal, Utc::now()).await?;
    Ok(PromocodePreview {
        code: promocode.code,
        kind: promocode.kind,
        subtotal,
        discount,
    })
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreatePromocodeRequest {
    pub code: String,
    pub kind: PromocodeKind,
    pub value: Decimal,
    #[serde(default)]
    pub min_order_amount: Option<Decimal>,
    #[serde(default)]
    pub max_uses: Option<i32>,
    #[serde(default)]
    pub per_user_limit: Option<i32>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

impl CreatePromocodeRequest {
    fn validate(&self) -> Result<String, AppError> {
        let code = normalize_code(&self.code)?;
        PromocodeRule {
            kind: self.kind,
            value: self.value,
            min_order_amount: self.min_order_amount,
            max_uses: self.max_uses,
            per_user_limit: self.per_user_limit,
            times_used: 0,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            is_active: true,
        }
        .validate_value()?;

        if self.max_uses.is_some_and(|n| n <= 0) || self.per_user_limit.is_some_and(|n| n <= 0) {
            return Err(AppError::Validation("usage limits must be positive".to_string()));
        }
        if self.min_order_amount.is_some_and(|m| m.is_sign_negative()) {
            return Err(AppError::Validation(
                "min_order_amount cannot be negative".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.starts_at, self.ends_at)
            && end <= start
        {
            return Err(AppError::Validation("ends_at must be after starts_at".to_string()));
        }
        Ok(code)
    }
}

/// Create a promocode.
///
/// # Errors
///
/// Returns `AppError::Validation` or `AppError::Promocode` for a bad request
/// and `AppError::Conflict` if the code exists.
#[instrument(skip(pool, request))]
pub async fn create(pool: &PgPool, request: &CreatePromocodeRequest) -> Result<Promocode, AppError> {
    let code = request.validate()?;
    let promocode = promocodes::create(
        pool,
        promocodes::NewPromocode {
            code: &code,
            kind: request.kind,
            value: request.value,
            min_order_amount: request.min_order_amount,
            max_uses: request.max_uses,
            per_user_limit: request.per_user_limit,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
        },
    )
    .await?;
    info!(promocode_id = %promocode.id, code = %promocode.code, "Promocode created");
    Ok(promocode)
}

/// List promocodes, newest first.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
pub async fn list(pool: &PgPool, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Promocode>, AppError> {
    let (limit, offset) = db::page(limit, offset);
    Ok(promocodes::list(pool, limit, offset).await?)
}

/// Stop a code from being redeemed.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the promocode does not exist.
pub async fn deactivate(pool: &PgPool, id: PromocodeId) -> Result<Promocode, AppError> {
    let promocode = promocodes::deactivate(pool, id).await?;
    info!(promocode_id = %id, "Promocode deactivated");
    Ok(promocode)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(code: &str, kind: PromocodeKind, value: i64) -> CreatePromocodeRequest {
        CreatePromocodeRequest {
            code: code.to_string(),
            kind,
            value: Decimal::new(value, 0),
            min_order_amount: None,
            max_uses: None,
            per_user_limit: None,
            starts_at: None,
            ends_at: None,
        }
    }

    #[test]
    fn test_create_normalizes_code() {
        let req = request(" spring-10 ", PromocodeKind::Percentage, 10);
        assert_eq!(req.validate().unwrap(), "SPRING-10");
    }

    #[test]
    fn test_create_rejects_bad_percentage() {
        let req = request("OVER", PromocodeKind::Percentage, 150);
        assert!(matches!(
            req.validate(),
            Err(AppError::Promocode(PromocodeError::InvalidValue))
        ));
    }

    #[test]
    fn test_create_rejects_inverted_window() {
        let mut req = request("WINDOW", PromocodeKind::FixedAmount, 5);
        let now = Utc::now();
        req.starts_at = Some(now);
        req.ends_at = Some(now - chrono::Duration::days(1));
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_create_rejects_zero_limits() {
        let mut req = request("LIMITS", PromocodeKind::FixedAmount, 5);
        req.max_uses = Some(0);
        assert!(req.validate().is_err());
    }
}
