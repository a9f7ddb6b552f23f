//! Domain models for the API.
//!
//! Most of these derive `sqlx::FromRow` directly: typed IDs, `Email` and the
//! status enums all decode from their columns, and JSONB columns come back as
//! `sqlx::types::Json<T>`.

pub mod cart;
pub mod contact;
pub mod notification;
pub mod order;
pub mod payment;
pub mod product;
pub mod promocode;
pub mod review;
pub mod subscription;
pub mod user;

pub use cart::{CartLine, CartView};
pub use contact::ContactMessage;
pub use notification::{NotificationLogEntry, NotificationPreferences};
pub use order::{Order, OrderDetail, OrderItem, ShippingAddress};
pub use payment::{PaymentIntent, Transaction};
pub use product::{Product, ProductDetail, RatingSummary, Variant};
pub use promocode::Promocode;
pub use review::Review;
pub use subscription::{Subscription, SubscriptionDetail, SubscriptionItem};
pub use user::{ApiToken, User};
