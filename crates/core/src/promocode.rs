//! Promocode rules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PromocodeKind, round_money};

const MIN_CODE_LENGTH: usize = 3;
const MAX_CODE_LENGTH: usize = 32;

/// Why a promocode cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromocodeError {
    #[error("promocode must be {MIN_CODE_LENGTH}-{MAX_CODE_LENGTH} characters of A-Z, 0-9, '-' or '_'")]
    InvalidCode,
    #[error("promocode not found")]
    NotFound,
    #[error("promocode is no longer active")]
    Inactive,
    #[error("promocode is not valid yet")]
    NotStarted,
    #[error("promocode has expired")]
    Expired,
    #[error("promocode usage limit reached")]
    UsageLimitReached,
    #[error("you have already used this promocode")]
    PerUserLimitReached,
    #[error("order subtotal must be at least {minimum}")]
    MinimumNotMet { minimum: Decimal },
    #[error("promocode value is invalid")]
    InvalidValue,
}

/// Normalize a customer-entered code: trim and uppercase.
///
/// # Errors
///
/// Returns [`PromocodeError::InvalidCode`] if the result has the wrong length
/// or characters outside `[A-Z0-9_-]`.
pub fn normalize_code(raw: &str) -> Result<String, PromocodeError> {
    let code = raw.trim().to_ascii_uppercase();
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid_chars || !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code.len()) {
        return Err(PromocodeError::InvalidCode);
    }
    Ok(code)
}

/// The parts of a stored promocode that decide whether it applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromocodeRule {
    pub kind: PromocodeKind,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_uses: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub times_used: i32,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl PromocodeRule {
    /// Check the value is sensible for the kind.
    ///
    /// # Errors
    ///
    /// Returns [`PromocodeError::InvalidValue`] for non-positive values or a
    /// percentage above 100.
    pub fn validate_value(&self) -> Result<(), PromocodeError> {
        let in_range = match self.kind {
            PromocodeKind::Percentage => {
                self.value > Decimal::ZERO && self.value <= Decimal::ONE_HUNDRED
            }
            PromocodeKind::FixedAmount => self.value > Decimal::ZERO,
        };
        if in_range {
            Ok(())
        } else {
            Err(PromocodeError::InvalidValue)
        }
    }

    /// Discount this code gives on `subtotal` for a customer who has already
    /// redeemed it `user_redemptions` times.
    ///
    /// # Errors
    ///
    /// Returns the first rule the redemption breaks, checked in the order:
    /// active flag, start, end, global limit, per-user limit, minimum order.
    pub fn evaluate(
        &self,
        subtotal: Decimal,
        user_redemptions: i64,
        now: DateTime<Utc>,
    ) -> Result<Decimal, PromocodeError> {
        if !self.is_active {
            return Err(PromocodeError::Inactive);
        }
        if self.starts_at.is_some_and(|start| now < start) {
            return Err(PromocodeError::NotStarted);
        }
        if self.ends_at.is_some_and(|end| now >= end) {
            return Err(PromocodeError::Expired);
        }
        if self.max_uses.is_some_and(|max| self.times_used >= max) {
            return Err(PromocodeError::UsageLimitReached);
        }
        if self
            .per_user_limit
            .is_some_and(|limit| user_redemptions >= i64::from(limit))
        {
            return Err(PromocodeError::PerUserLimitReached);
        }
        if let Some(minimum) = self.min_order_amount
            && subtotal < minimum
        {
            return Err(PromocodeError::MinimumNotMet { minimum });
        }
        self.validate_value()?;

        let discount = match self.kind {
            PromocodeKind::Percentage => {
                round_money(subtotal * self.value / Decimal::ONE_HUNDRED)
            }
            PromocodeKind::FixedAmount => self.value.min(subtotal),
        };
        Ok(discount)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn rule(kind: PromocodeKind, value: &str) -> PromocodeRule {
        PromocodeRule {
            kind,
            value: d(value),
            min_order_amount: None,
            max_uses: None,
            per_user_limit: None,
            times_used: 0,
            starts_at: None,
            ends_at: None,
            is_active: true,
        }
    }

    #[test]
    fn normalizes_codes() {
        assert_eq!(normalize_code("  summer-10 ").unwrap(), "SUMMER-10");
        assert_eq!(normalize_code("ab"), Err(PromocodeError::InvalidCode));
        assert_eq!(normalize_code("bad code"), Err(PromocodeError::InvalidCode));
        assert_eq!(normalize_code("émoji"), Err(PromocodeError::InvalidCode));
    }

    #[test]
    fn percentage_discount_is_rounded() {
        let r = rule(PromocodeKind::Percentage, "15");
        assert_eq!(r.evaluate(d("33.33"), 0, now()).unwrap(), d("5.00"));
    }

    #[test]
    fn fixed_discount_is_capped_at_subtotal() {
        let r = rule(PromocodeKind::FixedAmount, "20.00");
        assert_eq!(r.evaluate(d("12.00"), 0, now()).unwrap(), d("12.00"));
        assert_eq!(r.evaluate(d("50.00"), 0, now()).unwrap(), d("20.00"));
    }

    #[test]
    fn validity_window() {
        let mut r = rule(PromocodeKind::FixedAmount, "5");
        r.starts_at = Some(now() + Duration::days(1));
        assert_eq!(r.evaluate(d("10"), 0, now()), Err(PromocodeError::NotStarted));

        r.starts_at = None;
        r.ends_at = Some(now());
        assert_eq!(r.evaluate(d("10"), 0, now()), Err(PromocodeError::Expired));
    }

    #[test]
    fn usage_limits() {
        let mut r = rule(PromocodeKind::FixedAmount, "5");
        r.max_uses = Some(10);
        r.times_used = 10;
        assert_eq!(
            r.evaluate(d("10"), 0, now()),
            Err(PromocodeError::UsageLimitReached)
        );

        r.times_used = 3;
        r.per_user_limit = Some(1);
        assert_eq!(
            r.evaluate(d("10"), 1, now()),
            Err(PromocodeError::PerUserLimitReached)
        );
        assert!(r.evaluate(d("10"), 0, now()).is_ok());
    }

    #[test]
    fn minimum_order_and_inactive() {
        let mut r = rule(PromocodeKind::Percentage, "10");
        r.min_order_amount = Some(d("30.00"));
        assert_eq!(
            r.evaluate(d("29.99"), 0, now()),
            Err(PromocodeError::MinimumNotMet { minimum: d("30.00") })
        );

        r.is_active = false;
        assert_eq!(r.evaluate(d("100"), 0, now()), Err(PromocodeError::Inactive));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert_eq!(
            rule(PromocodeKind::Percentage, "150").validate_value(),
            Err(PromocodeError::InvalidValue)
        );
        assert_eq!(
            rule(PromocodeKind::FixedAmount, "0").validate_value(),
            Err(PromocodeError::InvalidValue)
        );
    }
}
