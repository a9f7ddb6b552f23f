//! Subscription renewals.
//!
//! [`RenewalService::run_once`] bills every due subscription, one row per
//! transaction. Each row is claimed with `FOR UPDATE SKIP LOCKED`, so any
//! number of API processes (or a CLI run) can share the work without billing
//! a subscription twice. [`RenewalScheduler::spawn`] runs a pass on a timer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use larder_core::{
    Adjustments, CurrencyCode, OrderId, OrderStatus, PaymentStatus, PricedLine, PricingError,
    PricingPolicy, RenewalFailure, RenewalSuccess, SubscriptionId, SubscriptionStatus, VariantId,
    compute_breakdown,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::notifications::{Notice, Notifier};
use super::payments::{self, OffSessionCharge, PaymentGateway};
use crate::config::RenewalConfig;
use crate::db::products::{self, LockedVariant};
use crate::db::subscriptions::{self, StatusChange};
use crate::db::{RepositoryError, UserRepository, orders};
use crate::models::{Subscription, SubscriptionItem};

/// Reason stored on subscriptions paused because nothing can be shipped.
pub const NO_PURCHASABLE_ITEMS: &str = "no purchasable items";

/// Counts from one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenewalSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub paused: usize,
    /// Rows rolled back because of a database or pricing error.
    pub errors: usize,
}

#[derive(Debug, Error)]
enum RenewalError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("pricing: {0}")]
    Pricing(#[from] PricingError),
    #[error("next billing date out of range")]
    DateOutOfRange,
}

/// What happened to one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Renewed {
        order_id: OrderId,
        total: Decimal,
        currency: CurrencyCode,
        next_billing_date: DateTime<Utc>,
    },
    Failed {
        attempts: i32,
        next_attempt: DateTime<Utc>,
        past_due: bool,
        reason: String,
    },
    Paused,
}

impl Outcome {
    fn notice(&self, subscription_id: SubscriptionId) -> Option<Notice> {
        match self {
            Self::Renewed {
                order_id,
                total,
                currency,
                next_billing_date,
            } => Some(Notice::RenewalSucceeded {
                subscription_id,
                order_id: *order_id,
                total: *total,
                currency: *currency,
                next_billing_date: *next_billing_date,
            }),
            Self::Failed {
                attempts,
                past_due: true,
                ..
            } => Some(Notice::SubscriptionPastDue {
                subscription_id,
                attempts: *attempts,
            }),
            Self::Failed {
                attempts,
                next_attempt,
                reason,
                ..
            } => Some(Notice::RenewalFailed {
                subscription_id,
                attempts: *attempts,
                next_attempt: *next_attempt,
                reason: reason.clone(),
            }),
            Self::Paused => None,
        }
    }
}

impl RenewalSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Renewed { .. } => self.succeeded += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Paused => self.paused += 1,
        }
    }
}

/// A subscription line priced for this renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RenewalLine {
    variant_id: VariantId,
    product_title: String,
    variant_title: String,
    sku: String,
    unit_price: Decimal,
    quantity: i32,
}

#[derive(Debug, PartialEq, Eq)]
enum Plan {
    /// Every item is inactive or gone.
    NothingToShip,
    /// A purchasable item lacks stock.
    OutOfStock { sku: String },
    Ready(Vec<RenewalLine>),
}

/// Match subscription items against their locked variants.
///
/// Inactive or deleted variants are dropped. Prices come from the variant
/// unless `price_lock` is set, in which case the at-creation price is used.
fn plan_lines(items: &[SubscriptionItem], variants: &[LockedVariant], price_lock: bool) -> Plan {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let Some(variant) = variants
            .iter()
            .find(|v| v.id == item.variant_id && v.purchasable)
        else {
            continue;
        };
        if variant.stock < item.quantity {
            return Plan::OutOfStock {
                sku: variant.sku.clone(),
            };
        }
        lines.push(RenewalLine {
            variant_id: variant.id,
            product_title: variant.product_title.clone(),
            variant_title: variant.title.clone(),
            sku: variant.sku.clone(),
            unit_price: if price_lock {
                item.unit_price_at_creation
            } else {
                variant.price
            },
            quantity: item.quantity,
        });
    }
    if lines.is_empty() {
        Plan::NothingToShip
    } else {
        Plan::Ready(lines)
    }
}

/// Idempotency key for one billing period, so a retried pass never double-charges.
fn renewal_key(id: SubscriptionId, due: DateTime<Utc>) -> String {
    format!("renewal-{id}-{}", due.format("%Y%m%dT%H%M%SZ"))
}

/// Bills due subscriptions.
#[derive(Clone)]
pub struct RenewalService {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Notifier,
    config: RenewalConfig,
    pricing: PricingPolicy,
}

impl RenewalService {
    #[must_use]
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Notifier,
        config: RenewalConfig,
        pricing: PricingPolicy,
    ) -> Self {
        Self {
            pool,
            gateway,
            notifier,
            config,
            pricing,
        }
    }

    /// Bill up to `batch_size` due subscriptions.
    ///
    /// A row that hits a database or pricing error is rolled back, logged and
    /// skipped for the rest of the pass.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if a transaction cannot be started or a
    /// claim query fails.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<RenewalSummary, RepositoryError> {
        let now = Utc::now();
        let limit = usize::try_from(self.config.batch_size).unwrap_or(0);
        let mut summary = RenewalSummary::default();
        let mut skipped: Vec<SubscriptionId> = Vec::new();

        while summary.processed < limit {
            let mut tx = self.pool.begin().await?;
            let Some(subscription) = subscriptions::claim_next_due(&mut tx, now, &skipped).await?
            else {
                break;
            };
            summary.processed += 1;

            match self.renew(&mut tx, &subscription, now).await {
                Ok(outcome) => {
                    tx.commit().await?;
                    summary.record(&outcome);
                    if let Some(notice) = outcome.notice(subscription.id) {
                        self.notifier.send(subscription.user_id, notice);
                    }
                }
                Err(err) => {
                    drop(tx);
                    error!(
                        subscription_id = %subscription.id,
                        error = %err,
                        "Renewal rolled back"
                    );
                    summary.errors += 1;
                    skipped.push(subscription.id);
                }
            }
        }

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                paused = summary.paused,
                errors = summary.errors,
                "Renewal pass finished"
            );
        }
        Ok(summary)
    }

    #[instrument(skip_all, fields(subscription_id = %subscription.id))]
    async fn renew(
        &self,
        conn: &mut PgConnection,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> Result<Outcome, RenewalError> {
        let items = subscriptions::items(&mut *conn, subscription.id).await?;
        let mut ids: Vec<VariantId> = items.iter().map(|i| i.variant_id).collect();
        ids.sort_unstable();
        let variants = products::lock_variants(&mut *conn, &ids).await?;

        let lines = match plan_lines(&items, &variants, self.config.price_lock) {
            Plan::NothingToShip => {
                subscription.status.transition(SubscriptionStatus::Paused).map_err(|e| {
                    RepositoryError::DataCorruption(e.to_string())
                })?;
                subscriptions::set_status(
                    &mut *conn,
                    subscription.id,
                    StatusChange {
                        status: SubscriptionStatus::Paused,
                        next_billing_date: None,
                        failed_attempts: None,
                        pause_reason: Some(NO_PURCHASABLE_ITEMS),
                        cancel_reason: None,
                    },
                )
                .await?;
                info!("Subscription paused: nothing purchasable");
                return Ok(Outcome::Paused);
            }
            Plan::OutOfStock { sku } => {
                return self
                    .fail(conn, subscription, now, format!("insufficient stock for {sku}"))
                    .await;
            }
            Plan::Ready(lines) => lines,
        };

        let Some(payment_method_ref) = subscription.payment_method_ref.clone() else {
            return self
                .fail(conn, subscription, now, "no saved payment method".to_string())
                .await;
        };

        let user = UserRepository::new(&self.pool)
            .get_by_id(subscription.user_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        let priced: Vec<PricedLine> = lines
            .iter()
            .map(|l| PricedLine {
                variant_id: l.variant_id,
                unit_price: l.unit_price,
                quantity: l.quantity,
            })
            .collect();
        let breakdown = compute_breakdown(
            &priced,
            &self.pricing,
            Adjustments {
                loyalty_rate: user.loyalty_rate,
                promocode_discount: Decimal::ZERO,
            },
        )?;

        let order = orders::insert(
            &mut *conn,
            orders::NewOrder {
                user_id: subscription.user_id,
                subscription_id: Some(subscription.id),
                currency: subscription.currency,
                breakdown: &breakdown,
                promocode_id: None,
                shipping_address: &subscription.shipping_address.0,
                metadata: serde_json::json!({
                    "source": "renewal",
                    "billing_date": subscription.next_billing_date,
                }),
            },
        )
        .await?;
        let order_items: Vec<orders::NewOrderItem<'_>> = lines
            .iter()
            .zip(&breakdown.lines)
            .map(|(line, total)| orders::NewOrderItem {
                variant_id: line.variant_id,
                product_title: &line.product_title,
                variant_title: &line.variant_title,
                sku: &line.sku,
                unit_price: line.unit_price,
                quantity: line.quantity,
                line_total: total.line_total,
            })
            .collect();
        orders::insert_items(&mut *conn, order.id, &order_items).await?;
        for line in &lines {
            products::adjust_stock(&mut *conn, line.variant_id, -line.quantity).await?;
        }

        if breakdown.total.is_zero() {
            orders::set_status(&mut *conn, order.id, OrderStatus::Paid).await?;
            return self.succeed(conn, subscription, now, &order).await;
        }

        let charge = OffSessionCharge {
            order_id: order.id,
            amount: order.total,
            currency: order.currency,
            customer_ref: user.gateway_customer_id.clone(),
            payment_method_ref,
            idempotency_key: renewal_key(subscription.id, subscription.next_billing_date),
        };
        let reason = match self.gateway.charge_off_session(&charge).await {
            Ok(result) => {
                let intent = crate::db::payments::upsert_intent(
                    &mut *conn,
                    crate::db::payments::NewPaymentIntent {
                        order_id: order.id,
                        gateway_id: &result.id,
                        client_secret: None,
                        amount: order.total,
                        currency: order.currency,
                        status: result.status,
                        off_session: true,
                        last_error: result.last_error.as_deref(),
                    },
                )
                .await?;
                if result.status == PaymentStatus::Succeeded {
                    payments::record_success(&mut *conn, &order, &intent).await?;
                    return self.succeed(conn, subscription, now, &order).await;
                }
                let reason = result
                    .last_error
                    .unwrap_or_else(|| format!("payment {}", result.status));
                payments::record_failure(&mut *conn, &order, &intent, Some(&reason)).await?;
                reason
            }
            Err(err) => {
                warn!(error = %err, "Off-session charge errored");
                orders::set_status(&mut *conn, order.id, OrderStatus::PaymentFailed).await?;
                "payment gateway unavailable".to_string()
            }
        };

        // Stock is released, so the order can no longer be paid or cancelled.
        for line in &lines {
            products::adjust_stock(&mut *conn, line.variant_id, line.quantity).await?;
        }
        orders::set_status(&mut *conn, order.id, OrderStatus::Cancelled).await?;
        self.fail(conn, subscription, now, reason).await
    }

    async fn succeed(
        &self,
        conn: &mut PgConnection,
        subscription: &Subscription,
        now: DateTime<Utc>,
        order: &crate::models::Order,
    ) -> Result<Outcome, RenewalError> {
        let period = u32::try_from(subscription.billing_period)
            .map_err(|_| RepositoryError::DataCorruption("negative billing period".to_string()))?;
        let next = RenewalSuccess::compute(
            subscription.billing_cycle,
            subscription.billing_anchor,
            period,
            now,
        )
        .ok_or(RenewalError::DateOutOfRange)?;
        let next_period =
            i32::try_from(next.next_period).map_err(|_| RenewalError::DateOutOfRange)?;
        subscriptions::mark_renewed(conn, subscription.id, next.next_billing_date, next_period, now)
            .await?;
        info!(order_id = %order.id, next_billing_date = %next.next_billing_date, "Subscription renewed");
        Ok(Outcome::Renewed {
            order_id: order.id,
            total: order.total,
            currency: order.currency,
            next_billing_date: next.next_billing_date,
        })
    }

    async fn fail(
        &self,
        conn: &mut PgConnection,
        subscription: &Subscription,
        now: DateTime<Utc>,
        reason: String,
    ) -> Result<Outcome, RenewalError> {
        let failure = RenewalFailure::compute(
            subscription.failed_attempts,
            self.config.max_failed_attempts,
            self.config.retry_delay,
            now,
        );
        let status = if failure.past_due {
            SubscriptionStatus::PastDue
        } else {
            SubscriptionStatus::Active
        };
        subscriptions::set_status(
            conn,
            subscription.id,
            StatusChange {
                status,
                next_billing_date: Some(failure.next_billing_date),
                failed_attempts: Some(failure.failed_attempts),
                pause_reason: None,
                cancel_reason: None,
            },
        )
        .await?;
        warn!(
            attempts = failure.failed_attempts,
            past_due = failure.past_due,
            reason = %reason,
            "Renewal failed"
        );
        Ok(Outcome::Failed {
            attempts: failure.failed_attempts,
            next_attempt: failure.next_billing_date,
            past_due: failure.past_due,
            reason,
        })
    }
}

/// Runs renewal passes in the background.
pub struct RenewalScheduler;

impl RenewalScheduler {
    /// Run `service.run_once` every `interval`. A slow pass delays the next
    /// tick instead of bunching missed ones.
    pub fn spawn(service: RenewalService, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match service.run_once().await {
                    Ok(summary) if summary.processed == 0 => debug!("No subscriptions due"),
                    Ok(_) => {}
                    Err(err) => warn!(?err, "renewal tick failed"),
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use larder_core::ProductId;

    use super::*;

    fn item(variant: i32, quantity: i32, at_creation: i64) -> SubscriptionItem {
        SubscriptionItem {
            subscription_id: SubscriptionId::new(1),
            variant_id: VariantId::new(variant),
            quantity,
            unit_price_at_creation: Decimal::new(at_creation, 2),
        }
    }

    fn variant(id: i32, price: i64, stock: i32, purchasable: bool) -> LockedVariant {
        LockedVariant {
            id: VariantId::new(id),
            product_id: ProductId::new(1),
            product_title: "Rolled Oats".to_string(),
            title: "1kg".to_string(),
            sku: format!("OATS-{id}"),
            price: Decimal::new(price, 2),
            stock,
            purchasable,
        }
    }

    #[test]
    fn test_plan_uses_current_prices() {
        let plan = plan_lines(&[item(1, 2, 400)], &[variant(1, 450, 10, true)], false);
        let Plan::Ready(lines) = plan else {
            panic!("expected ready plan");
        };
        assert_eq!(lines[0].unit_price, Decimal::new(450, 2));
        assert_eq!(lines[0].quantity, 2);
    }

    #[test]
    fn test_plan_price_lock_uses_creation_prices() {
        let plan = plan_lines(&[item(1, 2, 400)], &[variant(1, 450, 10, true)], true);
        let Plan::Ready(lines) = plan else {
            panic!("expected ready plan");
        };
        assert_eq!(lines[0].unit_price, Decimal::new(400, 2));
    }

    #[test]
    fn test_plan_skips_inactive_and_missing_variants() {
        let plan = plan_lines(
            &[item(1, 1, 400), item(2, 1, 300), item(3, 1, 100)],
            &[variant(1, 400, 5, false), variant(2, 300, 5, true)],
            false,
        );
        let Plan::Ready(lines) = plan else {
            panic!("expected ready plan");
        };
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].variant_id, VariantId::new(2));
    }

    #[test]
    fn test_plan_nothing_to_ship() {
        let plan = plan_lines(&[item(1, 1, 400)], &[variant(1, 400, 5, false)], false);
        assert_eq!(plan, Plan::NothingToShip);
        assert_eq!(plan_lines(&[], &[], false), Plan::NothingToShip);
    }

    #[test]
    fn test_plan_out_of_stock() {
        let plan = plan_lines(&[item(1, 3, 400)], &[variant(1, 400, 2, true)], false);
        assert_eq!(
            plan,
            Plan::OutOfStock {
                sku: "OATS-1".to_string()
            }
        );
    }

    #[test]
    fn test_renewal_key_is_stable_per_period() {
        let due = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(
            renewal_key(SubscriptionId::new(42), due),
            "renewal-42-20260301T093000Z"
        );
    }

    #[test]
    fn test_outcome_notices() {
        let id = SubscriptionId::new(7);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let past_due = Outcome::Failed {
            attempts: 3,
            next_attempt: now,
            past_due: true,
            reason: "card_declined".to_string(),
        };
        assert!(matches!(
            past_due.notice(id),
            Some(Notice::SubscriptionPastDue { attempts: 3, .. })
        ));

        let retry = Outcome::Failed {
            attempts: 1,
            next_attempt: now,
            past_due: false,
            reason: "card_declined".to_string(),
        };
        assert!(matches!(retry.notice(id), Some(Notice::RenewalFailed { .. })));
        assert!(Outcome::Paused.notice(id).is_none());
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RenewalSummary::default();
        summary.record(&Outcome::Paused);
        summary.record(&Outcome::Failed {
            attempts: 1,
            next_attempt: Utc::now(),
            past_due: false,
            reason: String::new(),
        });
        assert_eq!(summary.paused, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 0);
    }
}
