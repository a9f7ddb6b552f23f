//! Promocodes and their redemptions.

use chrono::{DateTime, Utc};
use larder_core::{OrderId, PromocodeId, PromocodeKind, UserId};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use super::RepositoryError;
use crate::models::Promocode;

const PROMOCODE_COLUMNS: &str = "id, code, kind, value, min_order_amount, max_uses, \
     per_user_limit, times_used, starts_at, ends_at, is_active, created_at";

/// Fields for a new promocode. `code` must already be normalized.
#[derive(Debug, Clone)]
pub struct NewPromocode<'a> {
    pub code: &'a str,
    pub kind: PromocodeKind,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_uses: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

/// Look up a code.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn get_by_code(pool: &PgPool, code: &str) -> Result<Option<Promocode>, RepositoryError> {
    let promocode = sqlx::query_as::<_, Promocode>(&format!(
        "SELECT {PROMOCODE_COLUMNS} FROM shop.promocodes WHERE code = $1"
    ))
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(promocode)
}

/// Look up and lock a code for redemption.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lock_by_code(
    conn: &mut PgConnection,
    code: &str,
) -> Result<Option<Promocode>, RepositoryError> {
    let promocode = sqlx::query_as::<_, Promocode>(&format!(
        "SELECT {PROMOCODE_COLUMNS} FROM shop.promocodes WHERE code = $1 FOR UPDATE"
    ))
    .bind(code)
    .fetch_optional(conn)
    .await?;
    Ok(promocode)
}

/// How many times a user has redeemed a code.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn redemptions_by_user<'e, E>(
    executor: E,
    promocode_id: PromocodeId,
    user_id: UserId,
) -> Result<i64, RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM shop.promocode_redemptions WHERE promocode_id = $1 AND user_id = $2",
    )
    .bind(promocode_id)
    .bind(user_id)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

/// Record a redemption and bump the usage counter.
///
/// The increment is guarded by `max_uses`, so a code can never be redeemed
/// past its limit even if two checkouts raced past validation.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the code hit its usage limit.
pub async fn redeem(
    conn: &mut PgConnection,
    promocode_id: PromocodeId,
    user_id: UserId,
    order_id: OrderId,
    discount: Decimal,
) -> Result<(), RepositoryError> {
    let bumped = sqlx::query(
        "UPDATE shop.promocodes SET times_used = times_used + 1 \
         WHERE id = $1 AND (max_uses IS NULL OR times_used < max_uses)",
    )
    .bind(promocode_id)
    .execute(&mut *conn)
    .await?;
    if bumped.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(
            "promocode usage limit reached".to_string(),
        ));
    }

    sqlx::query(
        "INSERT INTO shop.promocode_redemptions (promocode_id, user_id, order_id, discount) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(promocode_id)
    .bind(user_id)
    .bind(order_id)
    .bind(discount)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Release the redemption attached to a cancelled order.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if a statement fails.
pub async fn release_for_order(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> Result<(), RepositoryError> {
    let released: Option<PromocodeId> = sqlx::query_scalar(
        "DELETE FROM shop.promocode_redemptions WHERE order_id = $1 RETURNING promocode_id",
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(promocode_id) = released {
        sqlx::query(
            "UPDATE shop.promocodes SET times_used = GREATEST(times_used - 1, 0) WHERE id = $1",
        )
        .bind(promocode_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Create a code.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the code already exists.
pub async fn create(pool: &PgPool, new: NewPromocode<'_>) -> Result<Promocode, RepositoryError> {
    sqlx::query_as::<_, Promocode>(&format!(
        "INSERT INTO shop.promocodes \
             (code, kind, value, min_order_amount, max_uses, per_user_limit, starts_at, ends_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING {PROMOCODE_COLUMNS}"
    ))
    .bind(new.code)
    .bind(new.kind)
    .bind(new.value)
    .bind(new.min_order_amount)
    .bind(new.max_uses)
    .bind(new.per_user_limit)
    .bind(new.starts_at)
    .bind(new.ends_at)
    .fetch_one(pool)
    .await
    .map_err(|e| RepositoryError::conflict_on_unique(e, "promocode already exists"))
}

/// All codes, newest first.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Promocode>, RepositoryError> {
    let promocodes = sqlx::query_as::<_, Promocode>(&format!(
        "SELECT {PROMOCODE_COLUMNS} FROM shop.promocodes \
         ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(promocodes)
}

/// Turn a code off.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the code does not exist.
pub async fn deactivate(pool: &PgPool, id: PromocodeId) -> Result<Promocode, RepositoryError> {
    sqlx::query_as::<_, Promocode>(&format!(
        "UPDATE shop.promocodes SET is_active = FALSE WHERE id = $1 RETURNING {PROMOCODE_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(RepositoryError::NotFound)
}
