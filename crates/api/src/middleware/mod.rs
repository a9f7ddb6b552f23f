//! HTTP middleware stack for the API.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, transaction)
//! 2. `TraceLayer` (request span with status and latency)
//! 3. Request ID (read or generate `x-request-id`)
//! 4. Rate limiting (governor, per client IP) on `/v1` except the webhook
//!
//! Authentication is not a layer: handlers take [`RequireUser`],
//! [`RequireAdmin`] or [`OptionalUser`] as extractors.

pub mod auth;
pub mod rate_limit;
pub mod request_id;

pub use auth::{OptionalUser, RequireAdmin, RequireUser};
pub use rate_limit::{api_rate_limiter, strict_rate_limiter};
pub use request_id::request_id_middleware;
