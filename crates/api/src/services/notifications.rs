//! Transactional email.
//!
//! [`Notifier::send`] returns immediately; delivery runs on a spawned task
//! that checks the user's preferences, renders the askama templates, sends
//! over SMTP and writes one `notification_log` row whatever the outcome.

use std::sync::{Arc, Mutex};

use askama::Template;
use chrono::{DateTime, Utc};
use larder_core::{
    CurrencyCode, DeliveryStatus, NotificationKind, OrderId, SubscriptionId, UserId,
};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::config::EmailConfig;
use crate::db::{UserRepository, notifications};

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// One line of an order confirmation.
#[derive(Debug, Clone)]
pub struct NoticeItem {
    pub title: String,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// Something a customer should hear about.
#[derive(Debug, Clone)]
pub enum Notice {
    OrderConfirmation {
        order_id: OrderId,
        total: Decimal,
        currency: CurrencyCode,
        items: Vec<NoticeItem>,
    },
    PaymentFailed {
        order_id: OrderId,
        total: Decimal,
        currency: CurrencyCode,
        reason: String,
    },
    RenewalSucceeded {
        subscription_id: SubscriptionId,
        order_id: OrderId,
        total: Decimal,
        currency: CurrencyCode,
        next_billing_date: DateTime<Utc>,
    },
    RenewalFailed {
        subscription_id: SubscriptionId,
        attempts: i32,
        next_attempt: DateTime<Utc>,
        reason: String,
    },
    SubscriptionPastDue {
        subscription_id: SubscriptionId,
        attempts: i32,
    },
}

/// Rendered subject and bodies.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl Notice {
    #[must_use]
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::OrderConfirmation { .. } => NotificationKind::OrderConfirmation,
            Self::PaymentFailed { .. } => NotificationKind::PaymentFailed,
            Self::RenewalSucceeded { .. } => NotificationKind::RenewalSucceeded,
            Self::RenewalFailed { .. } => NotificationKind::RenewalFailed,
            Self::SubscriptionPastDue { .. } => NotificationKind::SubscriptionPastDue,
        }
    }

    #[must_use]
    pub fn subject(&self) -> String {
        match self {
            Self::OrderConfirmation { order_id, .. } => format!("Order #{order_id} confirmed"),
            Self::PaymentFailed { order_id, .. } => format!("Payment failed for order #{order_id}"),
            Self::RenewalSucceeded { subscription_id, .. } => {
                format!("Subscription #{subscription_id} renewed")
            }
            Self::RenewalFailed { subscription_id, .. } => {
                format!("We couldn't renew subscription #{subscription_id}")
            }
            Self::SubscriptionPastDue { subscription_id, .. } => {
                format!("Subscription #{subscription_id} is on hold")
            }
        }
    }

    /// Record the log entry points at, e.g. `order:42`.
    #[must_use]
    pub fn reference(&self) -> String {
        match self {
            Self::OrderConfirmation { order_id, .. } | Self::PaymentFailed { order_id, .. } => {
                format!("order:{order_id}")
            }
            Self::RenewalSucceeded { subscription_id, .. }
            | Self::RenewalFailed { subscription_id, .. }
            | Self::SubscriptionPastDue { subscription_id, .. } => {
                format!("subscription:{subscription_id}")
            }
        }
    }

    /// Render both bodies.
    ///
    /// # Errors
    ///
    /// Returns `EmailError::Template` if a template fails to render.
    pub fn render(&self, name: &str, base_url: &str) -> Result<RenderedEmail, EmailError> {
        let (html, text) = match self {
            Self::OrderConfirmation {
                order_id,
                total,
                currency,
                items,
            } => (
                OrderConfirmationHtml { name, base_url, order_id, total, currency, items }
                    .render()?,
                OrderConfirmationText { name, base_url, order_id, total, currency, items }
                    .render()?,
            ),
            Self::PaymentFailed {
                order_id,
                total,
                currency,
                reason,
            } => (
                PaymentFailedHtml { name, base_url, order_id, total, currency, reason }.render()?,
                PaymentFailedText { name, base_url, order_id, total, currency, reason }.render()?,
            ),
            Self::RenewalSucceeded {
                subscription_id,
                order_id,
                total,
                currency,
                next_billing_date,
            } => (
                RenewalSucceededHtml {
                    name,
                    base_url,
                    subscription_id,
                    order_id,
                    total,
                    currency,
                    next_billing_date,
                }
                .render()?,
                RenewalSucceededText {
                    name,
                    base_url,
                    subscription_id,
                    order_id,
                    total,
                    currency,
                    next_billing_date,
                }
                .render()?,
            ),
            Self::RenewalFailed {
                subscription_id,
                attempts,
                next_attempt,
                reason,
            } => (
                RenewalFailedHtml { name, base_url, subscription_id, attempts, next_attempt, reason }
                    .render()?,
                RenewalFailedText { name, base_url, subscription_id, attempts, next_attempt, reason }
                    .render()?,
            ),
            Self::SubscriptionPastDue {
                subscription_id,
                attempts,
            } => (
                PastDueHtml { name, base_url, subscription_id, attempts }.render()?,
                PastDueText { name, base_url, subscription_id, attempts }.render()?,
            ),
        };

        Ok(RenderedEmail {
            subject: self.subject(),
            text,
            html,
        })
    }
}

// =============================================================================
// Templates
// =============================================================================

#[derive(Template)]
#[template(path = "email/order_confirmation.html")]
struct OrderConfirmationHtml<'a> {
    name: &'a str,
    base_url: &'a str,
    order_id: &'a OrderId,
    total: &'a Decimal,
    currency: &'a CurrencyCode,
    items: &'a [NoticeItem],
}

#[derive(Template)]
#[template(path = "email/order_confirmation.txt")]
struct OrderConfirmationText<'a> {
    name: &'a str,
    base_url: &'a str,
    order_id: &'a OrderId,
    total: &'a Decimal,
    currency: &'a CurrencyCode,
    items: &'a [NoticeItem],
}

#[derive(Template)]
#[template(path = "email/payment_failed.html")]
struct PaymentFailedHtml<'a> {
    name: &'a str,
    base_url: &'a str,
    order_id: &'a OrderId,
    total: &'a Decimal,
    currency: &'a CurrencyCode,
    reason: &'a str,
}

#[derive(Template)]
#[template(path = "email/payment_failed.txt")]
struct PaymentFailedText<'a> {
    name: &'a str,
    base_url: &'a str,
    order_id: &'a OrderId,
    total: &'a Decimal,
    currency: &'a CurrencyCode,
    reason: &'a str,
}

#[derive(Template)]
#[template(path = "email/renewal_succeeded.html")]
struct RenewalSucceededHtml<'a> {
    name: &'a str,
    base_url: &'a str,
    subscription_id: &'a SubscriptionId,
    order_id: &'a OrderId,
    total: &'a Decimal,
    currency: &'a CurrencyCode,
    next_billing_date: &'a DateTime<Utc>,
}

#[derive(Template)]
#[template(path = "email/renewal_succeeded.txt")]
struct RenewalSucceededText<'a> {
    name: &'a str,
    base_url: &'a str,
    subscription_id: &'a SubscriptionId,
    order_id: &'a OrderId,
    total: &'a Decimal,
    currency: &'a CurrencyCode,
    next_billing_date: &'a DateTime<Utc>,
}

#[derive(Template)]
#[template(path = "email/renewal_failed.html")]
struct RenewalFailedHtml<'a> {
    name: &'a str,
    base_url: &'a str,
    subscription_id: &'a SubscriptionId,
    attempts: &'a i32,
    next_attempt: &'a DateTime<Utc>,
    reason: &'a str,
}

#[derive(Template)]
#[template(path = "email/renewal_failed.txt")]
struct RenewalFailedText<'a> {
    name: &'a str,
    base_url: &'a str,
    subscription_id: &'a SubscriptionId,
    attempts: &'a i32,
    next_attempt: &'a DateTime<Utc>,
    reason: &'a str,
}

#[derive(Template)]
#[template(path = "email/subscription_past_due.html")]
struct PastDueHtml<'a> {
    name: &'a str,
    base_url: &'a str,
    subscription_id: &'a SubscriptionId,
    attempts: &'a i32,
}

#[derive(Template)]
#[template(path = "email/subscription_past_due.txt")]
struct PastDueText<'a> {
    name: &'a str,
    base_url: &'a str,
    subscription_id: &'a SubscriptionId,
    attempts: &'a i32,
}

// =============================================================================
// Delivery
// =============================================================================

/// SMTP sender.
#[derive(Clone)]
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl EmailService {
    /// Create a new email service from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }

    /// Send a multipart email with both plain text and HTML versions.
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<(), EmailError> {
        let message = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(to.to_string()))?)
            .subject(email.subject.as_str())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html.clone()),
                    ),
            )?;

        self.mailer.send(message).await?;
        Ok(())
    }
}

/// Queues notifications and records what happened to them.
#[derive(Clone)]
pub struct Notifier {
    pool: PgPool,
    mailer: Option<EmailService>,
    base_url: String,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl Notifier {
    /// Without a mailer every notification is logged as skipped.
    #[must_use]
    pub fn new(pool: PgPool, mailer: Option<EmailService>, base_url: String) -> Self {
        Self {
            pool,
            mailer,
            base_url,
            pending: Arc::default(),
        }
    }

    /// Deliver in the background.
    pub fn send(&self, user_id: UserId, notice: Notice) {
        let notifier = self.clone();
        let task = async move {
            notifier.deliver(user_id, notice).await;
        };
        match self.pending.lock() {
            Ok(mut pending) => {
                while pending.try_join_next().is_some() {}
                pending.spawn(task);
            }
            Err(_) => {
                tokio::spawn(task);
            }
        }
    }

    /// Wait for every queued delivery to finish.
    ///
    /// Short-lived processes call this before exiting; dropping the last
    /// handle aborts whatever is still queued.
    pub async fn drain(&self) {
        let mut pending = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        while pending.join_next().await.is_some() {}
    }

    /// Deliver now and report the logged status.
    #[instrument(skip(self, notice), fields(kind = %notice.kind()))]
    pub async fn deliver(&self, user_id: UserId, notice: Notice) -> DeliveryStatus {
        let subject = notice.subject();
        let reference = notice.reference();
        let (status, error) = match self.attempt(user_id, &notice).await {
            Ok(status) => (status, None),
            Err(err) => {
                warn!(error = %err, "Notification failed");
                (DeliveryStatus::Failed, Some(err.to_string()))
            }
        };

        if let Err(err) = notifications::log(
            &self.pool,
            notifications::NewLogEntry {
                user_id,
                kind: notice.kind(),
                status,
                subject: &subject,
                reference: Some(&reference),
                error: error.as_deref(),
            },
        )
        .await
        {
            warn!(error = %err, "Failed to write notification log");
        }
        status
    }

    async fn attempt(&self, user_id: UserId, notice: &Notice) -> Result<DeliveryStatus, DeliverError> {
        let prefs = notifications::preferences(&self.pool, user_id).await?;
        if !prefs.allows(notice.kind()) {
            return Ok(DeliveryStatus::Skipped);
        }
        let Some(mailer) = &self.mailer else {
            return Ok(DeliveryStatus::Skipped);
        };
        let user = UserRepository::new(&self.pool)
            .get_by_id(user_id)
            .await?
            .ok_or(DeliverError::UnknownUser)?;

        let email = notice.render(&user.name, &self.base_url)?;
        mailer.send(user.email.as_str(), &email).await?;
        info!(to = %user.email, subject = %email.subject, "Email sent successfully");
        Ok(DeliveryStatus::Sent)
    }
}

#[derive(Debug, Error)]
enum DeliverError {
    #[error(transparent)]
    Email(#[from] EmailError),
    #[error(transparent)]
    Database(#[from] crate::db::RepositoryError),
    #[error("user not found")]
    UnknownUser,
}
