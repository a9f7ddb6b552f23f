//! Stored promocodes.

use chrono::{DateTime, Utc};
use larder_core::{PromocodeId, PromocodeKind, PromocodeRule};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Promocode {
    pub id: PromocodeId,
    pub code: String,
    pub kind: PromocodeKind,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_uses: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub times_used: i32,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Promocode {
    /// The fields that decide whether the code applies.
    #[must_use]
    pub fn rule(&self) -> PromocodeRule {
        PromocodeRule {
            kind: self.kind,
            value: self.value,
            min_order_amount: self.min_order_amount,
            max_uses: self.max_uses,
            per_user_limit: self.per_user_limit,
            times_used: self.times_used,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            is_active: self.is_active,
        }
    }
}
