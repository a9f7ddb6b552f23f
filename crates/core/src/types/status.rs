//! Status enums and their transition rules.
//!
//! Each enum maps to a Postgres enum type in the `shop` schema (with the
//! `postgres` feature) and serializes in `snake_case` on the wire.

use serde::{Deserialize, Serialize};

/// A status change that the lifecycle rules do not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move {entity} from {from} to {to}")]
pub struct TransitionError {
    /// Which kind of record was being changed.
    pub entity: &'static str,
    /// Current status.
    pub from: String,
    /// Requested status.
    pub to: String,
}

/// Declare a `snake_case` string form for an enum.
macro_rules! status_strings {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Wire and database representation.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!(concat!("invalid ", stringify!($name), ": {}"), s)),
                }
            }
        }
    };
}

// =============================================================================
// Orders
// =============================================================================

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, awaiting payment.
    #[default]
    Pending,
    /// Payment collected.
    Paid,
    /// The last payment attempt failed; can be retried.
    PaymentFailed,
    /// Handed to the carrier.
    Fulfilled,
    /// Received by the customer.
    Delivered,
    /// Cancelled before fulfillment.
    Cancelled,
    /// Money returned to the customer.
    Refunded,
}

status_strings!(OrderStatus {
    Pending => "pending",
    Paid => "paid",
    PaymentFailed => "payment_failed",
    Fulfilled => "fulfilled",
    Delivered => "delivered",
    Cancelled => "cancelled",
    Refunded => "refunded",
});

impl OrderStatus {
    /// Whether the lifecycle allows moving from `self` to `to`.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (
                Self::Pending,
                Self::Paid | Self::PaymentFailed | Self::Cancelled
            ) | (Self::PaymentFailed, Self::Paid | Self::Cancelled)
                | (Self::Paid, Self::Fulfilled | Self::Refunded)
                | (Self::Fulfilled, Self::Delivered | Self::Refunded)
                | (Self::Delivered, Self::Refunded)
        )
    }

    /// Validate a transition, returning the new status.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the move is not allowed.
    pub fn transition(self, to: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError {
                entity: "order",
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Whether money has been collected and not yet returned.
    #[must_use]
    pub const fn is_paid(self) -> bool {
        matches!(self, Self::Paid | Self::Fulfilled | Self::Delivered)
    }

    /// Whether the customer may still cancel (nothing has been collected).
    #[must_use]
    pub const fn is_cancellable_by_customer(self) -> bool {
        matches!(self, Self::Pending | Self::PaymentFailed)
    }

    /// Whether a payment may be attempted.
    #[must_use]
    pub const fn accepts_payment(self) -> bool {
        matches!(self, Self::Pending | Self::PaymentFailed)
    }

    /// No further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded)
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.subscription_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Billed on schedule.
    #[default]
    Active,
    /// Skipped by the scheduler until resumed.
    Paused,
    /// Too many failed renewals; waiting for a new payment method.
    PastDue,
    /// Ended for good.
    Cancelled,
}

status_strings!(SubscriptionStatus {
    Active => "active",
    Paused => "paused",
    PastDue => "past_due",
    Cancelled => "cancelled",
});

impl SubscriptionStatus {
    /// Whether the lifecycle allows moving from `self` to `to`.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Paused | Self::PastDue | Self::Cancelled)
                | (Self::Paused | Self::PastDue, Self::Active | Self::Cancelled)
        )
    }

    /// Validate a transition, returning the new status.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the move is not allowed.
    pub fn transition(self, to: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError {
                entity: "subscription",
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

// =============================================================================
// Payments
// =============================================================================

/// Payment intent status, mirroring the gateway's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.payment_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

status_strings!(PaymentStatus {
    RequiresPaymentMethod => "requires_payment_method",
    RequiresConfirmation => "requires_confirmation",
    RequiresAction => "requires_action",
    Processing => "processing",
    Succeeded => "succeeded",
    Failed => "failed",
    Canceled => "canceled",
});

impl PaymentStatus {
    /// Map a gateway status string. Unknown values are treated as processing.
    #[must_use]
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "requires_payment_method" => Self::RequiresPaymentMethod,
            "requires_confirmation" => Self::RequiresConfirmation,
            "requires_action" => Self::RequiresAction,
            "succeeded" => Self::Succeeded,
            "canceled" => Self::Canceled,
            "failed" => Self::Failed,
            _ => Self::Processing,
        }
    }

    /// The intent will not change again.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Direction of a money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.transaction_kind", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Charge,
    Refund,
}

status_strings!(TransactionKind {
    Charge => "charge",
    Refund => "refund",
});

// =============================================================================
// Catalog, users, support
// =============================================================================

/// How a promocode's value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.promocode_kind", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PromocodeKind {
    /// Value is a percentage of the subtotal, in (0, 100].
    Percentage,
    /// Value is an amount off, capped at the subtotal.
    FixedAmount,
}

status_strings!(PromocodeKind {
    Percentage => "percentage",
    FixedAmount => "fixed_amount",
});

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.user_role", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Shops, subscribes, reviews.
    #[default]
    Customer,
    /// Manages the catalog, orders and support inbox.
    Admin,
}

status_strings!(UserRole {
    Customer => "customer",
    Admin => "admin",
});

/// Support inbox status for a contact message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.contact_message_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ContactMessageStatus {
    #[default]
    New,
    Read,
    Replied,
    Archived,
}

status_strings!(ContactMessageStatus {
    New => "new",
    Read => "read",
    Replied => "replied",
    Archived => "archived",
});

// =============================================================================
// Notifications
// =============================================================================

/// Which preference flag governs a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceFlag {
    OrderUpdates,
    SubscriptionReminders,
    Marketing,
}

/// Transactional notifications the shop sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.notification_kind", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderConfirmation,
    PaymentFailed,
    RenewalSucceeded,
    RenewalFailed,
    SubscriptionPastDue,
}

status_strings!(NotificationKind {
    OrderConfirmation => "order_confirmation",
    PaymentFailed => "payment_failed",
    RenewalSucceeded => "renewal_succeeded",
    RenewalFailed => "renewal_failed",
    SubscriptionPastDue => "subscription_past_due",
});

impl NotificationKind {
    /// The preference flag a user toggles to opt out of this kind.
    #[must_use]
    pub const fn preference(self) -> PreferenceFlag {
        match self {
            Self::OrderConfirmation | Self::PaymentFailed => PreferenceFlag::OrderUpdates,
            Self::RenewalSucceeded | Self::RenewalFailed | Self::SubscriptionPastDue => {
                PreferenceFlag::SubscriptionReminders
            }
        }
    }
}

/// Outcome of one notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "shop.delivery_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    /// Opted out, or no mail transport configured.
    Skipped,
    Failed,
}

status_strings!(DeliveryStatus {
    Sent => "sent",
    Skipped => "skipped",
    Failed => "failed",
});

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn order_happy_path_is_allowed() {
        let status = OrderStatus::Pending
            .transition(OrderStatus::Paid)
            .and_then(|s| s.transition(OrderStatus::Fulfilled))
            .and_then(|s| s.transition(OrderStatus::Delivered))
            .and_then(|s| s.transition(OrderStatus::Refunded))
            .unwrap();
        assert_eq!(status, OrderStatus::Refunded);
    }

    #[test]
    fn order_failed_payment_can_be_retried() {
        assert!(OrderStatus::PaymentFailed.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::PaymentFailed));
    }

    #[test]
    fn order_terminal_states_are_final() {
        for to in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Fulfilled,
            OrderStatus::Refunded,
        ] {
            assert!(!OrderStatus::Cancelled.can_transition_to(to));
        }
        assert!(!OrderStatus::Refunded.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn order_paid_is_refunded_not_cancelled() {
        let err = OrderStatus::Paid
            .transition(OrderStatus::Cancelled)
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot move order from paid to cancelled");
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn order_cannot_skip_payment() {
        let err = OrderStatus::Pending
            .transition(OrderStatus::Fulfilled)
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot move order from pending to fulfilled");
    }

    #[test]
    fn order_customer_cancellation_window() {
        assert!(OrderStatus::Pending.is_cancellable_by_customer());
        assert!(OrderStatus::PaymentFailed.is_cancellable_by_customer());
        assert!(!OrderStatus::Paid.is_cancellable_by_customer());
    }

    #[test]
    fn subscription_transitions() {
        use SubscriptionStatus::{Active, Cancelled, PastDue, Paused};

        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(PastDue.can_transition_to(Active));
        assert!(Active.can_transition_to(Cancelled));
        assert!(!Paused.can_transition_to(PastDue));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(Active.transition(Active).is_err());
    }

    #[test]
    fn payment_status_from_gateway() {
        assert_eq!(
            PaymentStatus::from_gateway("succeeded"),
            PaymentStatus::Succeeded
        );
        assert_eq!(
            PaymentStatus::from_gateway("requires_action"),
            PaymentStatus::RequiresAction
        );
        assert_eq!(
            PaymentStatus::from_gateway("something_new"),
            PaymentStatus::Processing
        );
        assert!(PaymentStatus::Canceled.is_final());
        assert!(!PaymentStatus::Processing.is_final());
    }

    #[test]
    fn strings_round_trip_through_from_str() {
        assert_eq!(
            "payment_failed".parse::<OrderStatus>().unwrap(),
            OrderStatus::PaymentFailed
        );
        assert_eq!(
            serde_json::to_string(&SubscriptionStatus::PastDue).unwrap(),
            "\"past_due\""
        );
        assert!("bogus".parse::<UserRole>().is_err());
    }

    #[test]
    fn notification_kinds_map_to_preferences() {
        assert_eq!(
            NotificationKind::OrderConfirmation.preference(),
            PreferenceFlag::OrderUpdates
        );
        assert_eq!(
            NotificationKind::SubscriptionPastDue.preference(),
            PreferenceFlag::SubscriptionReminders
        );
    }
}
