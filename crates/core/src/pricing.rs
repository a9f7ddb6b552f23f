//! Cost breakdown calculator.
//!
//! Turns priced lines into the six figures stored on every order:
//!
//! ```text
//! subtotal  = Σ round(unit_price × quantity)
//! admin_fee = round(subtotal × admin_fee_rate)
//! delivery  = 0 when subtotal ≥ free_delivery_threshold, else delivery_fee
//! tax       = round((subtotal + admin_fee + delivery) × tax_rate)
//! discount  = min(round(subtotal × loyalty_rate) + promocode_discount, pre-discount total)
//! total     = subtotal + admin_fee + delivery + tax − discount
//! ```
//!
//! Each component is rounded to cents before it is summed, so the identity
//! holds exactly on the stored values and [`CostBreakdown::verify`] can check it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{VariantId, round_money};

/// Errors from [`compute_breakdown`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// No lines to price.
    #[error("order has no items")]
    EmptyOrder,
    /// A line has a zero or negative quantity.
    #[error("invalid quantity {quantity} for variant {variant_id}")]
    InvalidQuantity { variant_id: VariantId, quantity: i32 },
    /// A line has a negative unit price.
    #[error("negative price for variant {0}")]
    NegativePrice(VariantId),
    /// A rate is outside [0, 1].
    #[error("{name} must be between 0 and 1 (got {value})")]
    InvalidRate { name: &'static str, value: Decimal },
    /// A fee or discount amount is negative.
    #[error("{0} cannot be negative")]
    NegativeAmount(&'static str),
}

/// One line to price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub variant_id: VariantId,
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// Shop-wide fee and tax settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Fraction of the subtotal charged as a handling fee.
    pub admin_fee_rate: Decimal,
    /// Flat delivery charge.
    pub delivery_fee: Decimal,
    /// Subtotal at or above which delivery is free. `None` disables free delivery.
    pub free_delivery_threshold: Option<Decimal>,
    /// Sales tax rate applied to subtotal, admin fee and delivery.
    pub tax_rate: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            admin_fee_rate: Decimal::new(5, 2),
            delivery_fee: Decimal::new(500, 2),
            free_delivery_threshold: Some(Decimal::new(5000, 2)),
            tax_rate: Decimal::new(8, 2),
        }
    }
}

impl PricingPolicy {
    /// Check rates and amounts are in range.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range setting.
    pub fn validate(&self) -> Result<(), PricingError> {
        check_rate("admin_fee_rate", self.admin_fee_rate)?;
        check_rate("tax_rate", self.tax_rate)?;
        if self.delivery_fee.is_sign_negative() {
            return Err(PricingError::NegativeAmount("delivery_fee"));
        }
        if self
            .free_delivery_threshold
            .is_some_and(|t| t.is_sign_negative())
        {
            return Err(PricingError::NegativeAmount("free_delivery_threshold"));
        }
        Ok(())
    }
}

/// Per-customer reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Adjustments {
    /// Loyalty discount as a fraction of the subtotal.
    pub loyalty_rate: Decimal,
    /// Amount already computed from a promocode.
    pub promocode_discount: Decimal,
}

/// A priced line with its rounded total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTotal {
    pub variant_id: VariantId,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// The decomposition of an order total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub lines: Vec<LineTotal>,
    pub subtotal: Decimal,
    pub admin_fee: Decimal,
    pub delivery_fee: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl CostBreakdown {
    /// Total before the discount is taken off.
    #[must_use]
    pub fn gross(&self) -> Decimal {
        self.subtotal + self.admin_fee + self.delivery_fee + self.tax
    }

    /// The part of `discount` that came from the promocode.
    ///
    /// The loyalty discount is taken first, so when the combined discount is
    /// capped at the gross total the promocode absorbs the shortfall.
    #[must_use]
    pub fn promocode_share(&self, adjustments: &Adjustments) -> Decimal {
        let loyalty = round_money(self.subtotal * adjustments.loyalty_rate);
        let requested = round_money(adjustments.promocode_discount);
        (self.discount - loyalty).max(Decimal::ZERO).min(requested)
    }

    /// Re-check the breakdown identity and sign rules.
    ///
    /// Breakdowns read back from storage (subscription snapshots, old orders)
    /// go through this before they are trusted.
    #[must_use]
    pub fn verify(&self) -> bool {
        let components = [
            self.subtotal,
            self.admin_fee,
            self.delivery_fee,
            self.tax,
            self.discount,
            self.total,
        ];
        let line_sum: Decimal = self.lines.iter().map(|l| l.line_total).sum();

        components.iter().all(|c| !c.is_sign_negative())
            && self.discount <= self.gross()
            && self.total == self.gross() - self.discount
            && line_sum == self.subtotal
    }
}

/// Compute a cost breakdown.
///
/// # Errors
///
/// Returns [`PricingError`] for empty input, bad quantities or prices, or
/// out-of-range rates.
pub fn compute_breakdown(
    lines: &[PricedLine],
    policy: &PricingPolicy,
    adjustments: Adjustments,
) -> Result<CostBreakdown, PricingError> {
    if lines.is_empty() {
        return Err(PricingError::EmptyOrder);
    }
    policy.validate()?;
    check_rate("loyalty_rate", adjustments.loyalty_rate)?;
    if adjustments.promocode_discount.is_sign_negative() {
        return Err(PricingError::NegativeAmount("promocode_discount"));
    }

    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity <= 0 {
            return Err(PricingError::InvalidQuantity {
                variant_id: line.variant_id,
                quantity: line.quantity,
            });
        }
        if line.unit_price.is_sign_negative() {
            return Err(PricingError::NegativePrice(line.variant_id));
        }
        priced.push(LineTotal {
            variant_id: line.variant_id,
            unit_price: line.unit_price,
            quantity: line.quantity,
            line_total: round_money(line.unit_price * Decimal::from(line.quantity)),
        });
    }

    let subtotal: Decimal = priced.iter().map(|l| l.line_total).sum();
    let admin_fee = round_money(subtotal * policy.admin_fee_rate);
    let delivery_fee = match policy.free_delivery_threshold {
        Some(threshold) if subtotal >= threshold => Decimal::ZERO,
        _ => round_money(policy.delivery_fee),
    };
    let tax = round_money((subtotal + admin_fee + delivery_fee) * policy.tax_rate);
    let gross = subtotal + admin_fee + delivery_fee + tax;

    let requested = round_money(subtotal * adjustments.loyalty_rate)
        + round_money(adjustments.promocode_discount);
    let discount = requested.min(gross);

    Ok(CostBreakdown {
        lines: priced,
        subtotal,
        admin_fee,
        delivery_fee,
        tax,
        discount,
        total: gross - discount,
    })
}

fn check_rate(name: &'static str, value: Decimal) -> Result<(), PricingError> {
    if value.is_sign_negative() || value > Decimal::ONE {
        return Err(PricingError::InvalidRate { name, value });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn line(id: i32, price: &str, quantity: i32) -> PricedLine {
        PricedLine {
            variant_id: VariantId::new(id),
            unit_price: d(price),
            quantity,
        }
    }

    #[test]
    fn computes_every_component() {
        let lines = [line(1, "12.50", 2), line(2, "3.99", 3)];
        let breakdown =
            compute_breakdown(&lines, &PricingPolicy::default(), Adjustments::default()).unwrap();

        // 25.00 + 11.97
        assert_eq!(breakdown.subtotal, d("36.97"));
        assert_eq!(breakdown.admin_fee, d("1.85"));
        assert_eq!(breakdown.delivery_fee, d("5.00"));
        // (36.97 + 1.85 + 5.00) × 0.08 = 3.5056
        assert_eq!(breakdown.tax, d("3.51"));
        assert_eq!(breakdown.discount, d("0"));
        assert_eq!(breakdown.total, d("47.33"));
        assert!(breakdown.verify());
    }

    #[test]
    fn free_delivery_at_threshold() {
        let lines = [line(1, "25.00", 2)];
        let breakdown =
            compute_breakdown(&lines, &PricingPolicy::default(), Adjustments::default()).unwrap();
        assert_eq!(breakdown.delivery_fee, Decimal::ZERO);
    }

    #[test]
    fn no_threshold_always_charges_delivery() {
        let policy = PricingPolicy {
            free_delivery_threshold: None,
            ..PricingPolicy::default()
        };
        let breakdown =
            compute_breakdown(&[line(1, "500.00", 1)], &policy, Adjustments::default()).unwrap();
        assert_eq!(breakdown.delivery_fee, d("5.00"));
    }

    #[test]
    fn promocode_share_reflects_the_cap() {
        let adjustments = Adjustments {
            loyalty_rate: d("0.50"),
            promocode_discount: d("15.00"),
        };
        let breakdown =
            compute_breakdown(&[line(1, "10.00", 1)], &PricingPolicy::default(), adjustments)
                .unwrap();
        // gross 10.00 + 0.50 + 5.00 + 1.24
        assert_eq!(breakdown.discount, d("16.74"));
        assert_eq!(breakdown.total, Decimal::ZERO);
        assert_eq!(breakdown.promocode_share(&adjustments), d("11.74"));

        let small = Adjustments {
            loyalty_rate: d("0.10"),
            promocode_discount: d("2.00"),
        };
        let breakdown =
            compute_breakdown(&[line(1, "10.00", 1)], &PricingPolicy::default(), small).unwrap();
        assert_eq!(breakdown.promocode_share(&small), d("2.00"));
    }

    #[test]
    fn loyalty_and_promocode_discounts_stack() {
        let adjustments = Adjustments {
            loyalty_rate: d("0.10"),
            promocode_discount: d("2.00"),
        };
        let breakdown =
            compute_breakdown(&[line(1, "40.00", 1)], &PricingPolicy::default(), adjustments)
                .unwrap();

        assert_eq!(breakdown.discount, d("6.00"));
        assert_eq!(breakdown.total, breakdown.gross() - d("6.00"));
        assert!(breakdown.verify());
    }

    #[test]
    fn discount_never_drives_total_negative() {
        let adjustments = Adjustments {
            loyalty_rate: Decimal::ZERO,
            promocode_discount: d("1000.00"),
        };
        let breakdown =
            compute_breakdown(&[line(1, "10.00", 1)], &PricingPolicy::default(), adjustments)
                .unwrap();

        assert_eq!(breakdown.discount, breakdown.gross());
        assert_eq!(breakdown.total, Decimal::ZERO);
        assert!(breakdown.verify());
    }

    #[test]
    fn rejects_bad_input() {
        let policy = PricingPolicy::default();
        assert_eq!(
            compute_breakdown(&[], &policy, Adjustments::default()),
            Err(PricingError::EmptyOrder)
        );
        assert!(matches!(
            compute_breakdown(&[line(1, "1.00", 0)], &policy, Adjustments::default()),
            Err(PricingError::InvalidQuantity { .. })
        ));
        assert_eq!(
            compute_breakdown(&[line(7, "-1.00", 1)], &policy, Adjustments::default()),
            Err(PricingError::NegativePrice(VariantId::new(7)))
        );

        let bad_policy = PricingPolicy {
            tax_rate: d("1.5"),
            ..PricingPolicy::default()
        };
        assert!(matches!(
            compute_breakdown(&[line(1, "1.00", 1)], &bad_policy, Adjustments::default()),
            Err(PricingError::InvalidRate {
                name: "tax_rate",
                ..
            })
        ));
    }

    #[test]
    fn verify_catches_drift() {
        let mut breakdown = compute_breakdown(
            &[line(1, "9.99", 1)],
            &PricingPolicy::default(),
            Adjustments::default(),
        )
        .unwrap();
        breakdown.total += d("0.01");
        assert!(!breakdown.verify());
    }

    #[test]
    fn snapshot_survives_json() {
        let breakdown = compute_breakdown(
            &[line(3, "4.20", 5)],
            &PricingPolicy::default(),
            Adjustments::default(),
        )
        .unwrap();
        let json = serde_json::to_value(&breakdown).unwrap();
        assert_eq!(json["subtotal"], "21.00");

        let restored: CostBreakdown = serde_json::from_value(json).unwrap();
        assert!(restored.verify());
        assert_eq!(restored, breakdown);
    }
}
