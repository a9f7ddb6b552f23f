//! Larder Core - Domain types and pricing rules.
//!
//! This crate provides the pieces of the Larder shop that have no I/O:
//! - [`types`] - Typed IDs, email addresses, money helpers, and status enums
//! - [`pricing`] - The cost breakdown calculator used by checkout and subscriptions
//! - [`billing`] - Billing cycles and renewal outcome rules
//! - [`promocode`] - Promocode normalization and discount evaluation
//!
//! # Architecture
//!
//! Everything here is pure: no database access, no HTTP clients, no clocks.
//! Callers pass `now` explicitly so the rules can be tested deterministically.
//! The optional `postgres` feature adds `sqlx` encode/decode support for IDs
//! and enums so the API crate can bind them directly.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod billing;
pub mod pricing;
pub mod promocode;
pub mod types;

pub use billing::{BillingCycle, RenewalFailure, RenewalSuccess};
pub use pricing::{
    Adjustments, CostBreakdown, LineTotal, PricedLine, PricingError, PricingPolicy,
    compute_breakdown,
};
pub use promocode::{PromocodeError, PromocodeRule, normalize_code};
pub use types::*;
