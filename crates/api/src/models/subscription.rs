//! Subscriptions and their items.

use chrono::{DateTime, Utc};
use larder_core::{
    BillingCycle, CostBreakdown, CurrencyCode, SubscriptionId, SubscriptionStatus, UserId,
    VariantId,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::types::Json;

use super::ShippingAddress;

/// A recurring order.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub currency: CurrencyCode,
    pub next_billing_date: DateTime<Utc>,
    /// Start of the schedule; billing dates are this plus whole cycles.
    pub billing_anchor: DateTime<Utc>,
    /// Index of the period `next_billing_date` bills for.
    pub billing_period: i32,
    pub failed_attempts: i32,
    /// Breakdown captured when the items were last set.
    pub creation_pricing: Json<CostBreakdown>,
    pub shipping_address: Json<ShippingAddress>,
    pub payment_method_ref: Option<String>,
    pub pause_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub last_renewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One variant on a subscription.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionItem {
    pub subscription_id: SubscriptionId,
    pub variant_id: VariantId,
    pub quantity: i32,
    pub unit_price_at_creation: Decimal,
}

/// Subscription detail payload: the stored snapshot next to what the items
/// would cost today.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionDetail {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub items: Vec<SubscriptionItem>,
    /// `None` when none of the items can currently be bought.
    pub current_pricing: Option<CostBreakdown>,
}
