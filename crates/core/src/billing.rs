//! Billing cycles and renewal bookkeeping.
//!
//! The renewal scheduler charges a subscription when `next_billing_date` is
//! due and then asks this module where the date goes next. Every billing
//! date is `anchor + n cycles` for a period index `n`, never the previous
//! date plus one cycle, so a monthly plan started on the 31st bills on the
//! last day of short months and returns to the 31st afterwards. Retries move
//! `next_billing_date` but not the period index, so a renewal that succeeds
//! on a retry does not shift the schedule.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// How often a subscription renews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.billing_cycle", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Weekly,
    Biweekly,
    #[default]
    Monthly,
    Quarterly,
    Annual,
}

impl BillingCycle {
    /// The date `periods` cycles after `anchor`.
    ///
    /// Month-based cycles clamp to the last day of shorter months. Returns
    /// `None` only if the result falls outside chrono's representable range.
    #[must_use]
    pub fn advance_by(self, anchor: DateTime<Utc>, periods: u32) -> Option<DateTime<Utc>> {
        match self {
            Self::Weekly => anchor.checked_add_signed(Duration::weeks(i64::from(periods))),
            Self::Biweekly => anchor.checked_add_signed(Duration::weeks(2 * i64::from(periods))),
            Self::Monthly => anchor.checked_add_months(Months::new(periods)),
            Self::Quarterly => anchor.checked_add_months(Months::new(periods.checked_mul(3)?)),
            Self::Annual => anchor.checked_add_months(Months::new(periods.checked_mul(12)?)),
        }
    }

    /// One cycle after `anchor`.
    #[must_use]
    pub fn advance(self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.advance_by(anchor, 1)
    }

    /// The first period after `period` whose boundary is strictly later than
    /// `now`, with that boundary.
    ///
    /// A renewal that ran late bills once and skips the periods it missed.
    #[must_use]
    pub fn next_period(
        self,
        anchor: DateTime<Utc>,
        period: u32,
        now: DateTime<Utc>,
    ) -> Option<(u32, DateTime<Utc>)> {
        let mut next = period.checked_add(1)?;
        loop {
            let candidate = self.advance_by(anchor, next)?;
            if candidate > now {
                return Some((next, candidate));
            }
            next = next.checked_add(1)?;
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Annual => "annual",
        })
    }
}

/// Where a subscription stands after a successful renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalSuccess {
    /// Period index the next billing date belongs to.
    pub next_period: u32,
    pub next_billing_date: DateTime<Utc>,
}

impl RenewalSuccess {
    /// Bookkeeping after charging period `period` of a schedule anchored at
    /// `anchor`.
    #[must_use]
    pub fn compute(
        cycle: BillingCycle,
        anchor: DateTime<Utc>,
        period: u32,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        cycle
            .next_period(anchor, period, now)
            .map(|(next_period, next_billing_date)| Self {
                next_period,
                next_billing_date,
            })
    }
}

/// Where a subscription stands after a failed renewal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalFailure {
    /// Consecutive failures including this one.
    pub failed_attempts: i32,
    /// When the scheduler should try again.
    pub next_billing_date: DateTime<Utc>,
    /// The subscription should stop renewing until the customer acts.
    pub past_due: bool,
}

impl RenewalFailure {
    /// Bookkeeping after a failed attempt.
    ///
    /// `previous_failures` is the count before this attempt.
    #[must_use]
    pub fn compute(
        previous_failures: i32,
        max_attempts: i32,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let failed_attempts = previous_failures.saturating_add(1);
        Self {
            failed_attempts,
            next_billing_date: now + retry_delay,
            past_due: failed_attempts >= max_attempts,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    #[test]
    fn weekly_and_biweekly_add_days() {
        assert_eq!(BillingCycle::Weekly.advance(at(2026, 3, 1)), Some(at(2026, 3, 8)));
        assert_eq!(
            BillingCycle::Biweekly.advance(at(2026, 3, 1)),
            Some(at(2026, 3, 15))
        );
    }

    #[test]
    fn monthly_clamps_to_month_end_without_drift() {
        let anchor = at(2026, 1, 31);
        assert_eq!(BillingCycle::Monthly.advance(anchor), Some(at(2026, 2, 28)));
        assert_eq!(
            BillingCycle::Monthly.advance_by(anchor, 2),
            Some(at(2026, 3, 31))
        );
    }

    #[test]
    fn quarterly_and_annual() {
        assert_eq!(
            BillingCycle::Quarterly.advance(at(2026, 11, 30)),
            Some(at(2027, 2, 28))
        );
        assert_eq!(
            BillingCycle::Annual.advance(at(2028, 2, 29)),
            Some(at(2029, 2, 28))
        );
    }

    #[test]
    fn late_renewal_skips_missed_periods() {
        let anchor = at(2026, 1, 1);
        let now = at(2026, 1, 20);
        assert_eq!(
            BillingCycle::Weekly.next_period(anchor, 0, now),
            Some((3, at(2026, 1, 22)))
        );
    }

    #[test]
    fn on_time_renewal_moves_one_period() {
        let anchor = at(2026, 5, 10);
        let success = RenewalSuccess::compute(BillingCycle::Monthly, anchor, 0, anchor).unwrap();
        assert_eq!(success.next_period, 1);
        assert_eq!(success.next_billing_date, at(2026, 6, 10));
    }

    #[test]
    fn month_end_anchor_survives_consecutive_renewals() {
        let anchor = at(2026, 8, 31);
        let first = RenewalSuccess::compute(BillingCycle::Monthly, anchor, 0, anchor).unwrap();
        assert_eq!(first.next_billing_date, at(2026, 9, 30));

        let second = RenewalSuccess::compute(
            BillingCycle::Monthly,
            anchor,
            first.next_period,
            first.next_billing_date,
        )
        .unwrap();
        assert_eq!(second.next_billing_date, at(2026, 10, 31));
    }

    #[test]
    fn success_on_retry_keeps_the_schedule() {
        let anchor = at(2026, 3, 5);
        // Period 1 was due on April 5th and only went through two days later.
        let retried_at = at(2026, 4, 7);
        let success =
            RenewalSuccess::compute(BillingCycle::Monthly, anchor, 1, retried_at).unwrap();
        assert_eq!(success.next_period, 2);
        assert_eq!(success.next_billing_date, at(2026, 5, 5));
    }

    #[test]
    fn failures_retry_then_go_past_due() {
        let now = at(2026, 5, 10);
        let first = RenewalFailure::compute(0, 3, Duration::hours(24), now);
        assert_eq!(first.failed_attempts, 1);
        assert_eq!(first.next_billing_date, at(2026, 5, 11));
        assert!(!first.past_due);

        let third = RenewalFailure::compute(2, 3, Duration::hours(24), now);
        assert_eq!(third.failed_attempts, 3);
        assert!(third.past_due);
    }
}
