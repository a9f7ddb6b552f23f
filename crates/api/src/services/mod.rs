//! Business logic between the HTTP routes and the database.
//!
//! # Services
//!
//! - `auth` - Bearer token minting and hashing
//! - `catalog` - Cached product reads and admin catalog writes
//! - `cart` - Cart lines and the preview breakdown
//! - `checkout` - Quotes and order placement under row locks
//! - `orders` - Order reads, cancellation, admin status changes and refunds
//! - `payments` - Gateway trait, Stripe client and webhook handling
//! - `subscriptions` - Subscription lifecycle and pricing snapshots
//! - `renewal` - The renewal pass and its scheduler
//! - `promocodes` - Discount previews and admin management
//! - `reviews` - Product reviews
//! - `contact` - Contact messages
//! - `notifications` - Email rendering, delivery and the notification log

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod contact;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod promocodes;
pub mod renewal;
pub mod reviews;
pub mod subscriptions;
