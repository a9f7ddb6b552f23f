//! API server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `LARDER_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `LARDER_BASE_URL` - Public URL of the API
//! - `STRIPE_SECRET_KEY` - Payment gateway secret key
//! - `STRIPE_WEBHOOK_SECRET` - Webhook signing secret
//!
//! ## Optional
//! - `LARDER_HOST` - Bind address (default: 127.0.0.1)
//! - `LARDER_PORT` - Listen port (default: 3000)
//! - `LARDER_CURRENCY` - Shop currency (default: USD)
//! - `LARDER_LOG_JSON` - Emit JSON logs when set to `true` or `1`
//! - `STRIPE_API_BASE` - Gateway base URL (default: <https://api.stripe.com>)
//! - `PRICING_ADMIN_FEE_RATE` - Handling fee rate (default: 0.05)
//! - `PRICING_DELIVERY_FEE` - Flat delivery charge (default: 5.00)
//! - `PRICING_FREE_DELIVERY_THRESHOLD` - Free delivery from this subtotal (default: 50.00, empty disables)
//! - `PRICING_TAX_RATE` - Sales tax rate (default: 0.08)
//! - `RENEWAL_ENABLED` - Run the renewal scheduler in this process (default: true)
//! - `RENEWAL_INTERVAL_SECS` - Seconds between renewal passes (default: 300)
//! - `RENEWAL_BATCH_SIZE` - Max subscriptions billed per pass (default: 50)
//! - `RENEWAL_MAX_FAILED_ATTEMPTS` - Failures before a subscription goes past due (default: 3)
//! - `RENEWAL_RETRY_DELAY_HOURS` - Delay before retrying a failed renewal (default: 24)
//! - `SUBSCRIPTION_PRICE_LOCK` - Bill renewals at the prices captured at creation (default: false)
//! - `SMTP_HOST`, `SMTP_PORT` (587), `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_FROM` - all or none
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use larder_core::{CurrencyCode, PricingPolicy};
use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL
    pub base_url: String,
    /// Currency every price and order is denominated in
    pub currency: CurrencyCode,
    /// Emit JSON logs
    pub log_json: bool,
    /// Payment gateway configuration
    pub stripe: StripeConfig,
    /// Fees and tax applied at checkout and renewal
    pub pricing: PricingPolicy,
    /// Renewal scheduler settings
    pub renewal: RenewalConfig,
    /// SMTP settings; `None` disables outbound email
    pub email: Option<EmailConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Error event sample rate
    pub sentry_sample_rate: f32,
    /// Performance trace sample rate
    pub sentry_traces_sample_rate: f32,
}

/// Payment gateway configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// API base URL, overridable for local mocks
    pub api_base: String,
    /// Secret API key
    pub secret_key: SecretString,
    /// Webhook endpoint signing secret
    pub webhook_secret: SecretString,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .finish()
    }
}

/// Renewal scheduler settings.
#[derive(Debug, Clone)]
pub struct RenewalConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: i64,
    pub max_failed_attempts: i32,
    pub retry_delay: chrono::Duration,
    /// Bill at the unit prices captured when the subscription was created.
    pub price_lock: bool,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            batch_size: 50,
            max_failed_attempts: 3,
            retry_delay: chrono::Duration::hours(24),
            price_lock: false,
        }
    }
}

/// SMTP settings for transactional email.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: SecretString,
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl ApiConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("LARDER_DATABASE_URL")?;
        let host: IpAddr = parse_env_or_default("LARDER_HOST", "127.0.0.1")?;
        let port: u16 = parse_env_or_default("LARDER_PORT", "3000")?;
        let base_url = get_required_env("LARDER_BASE_URL")?;
        url::Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidEnvVar("LARDER_BASE_URL".to_string(), e.to_string()))?;
        let currency: CurrencyCode = parse_env_or_default("LARDER_CURRENCY", "USD")?;
        let log_json = parse_flag("LARDER_LOG_JSON", false)?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            currency,
            log_json,
            stripe: StripeConfig::from_env()?,
            pricing: pricing_from_env()?,
            renewal: RenewalConfig::from_env()?,
            email: EmailConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parse_env_or_default("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: parse_env_or_default("SENTRY_TRACES_SAMPLE_RATE", "0.1")?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl StripeConfig {
    /// Load gateway settings on their own (the CLI needs them without the server config).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a key is missing or looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_base: get_env_or_default("STRIPE_API_BASE", "https://api.stripe.com"),
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: get_validated_secret("STRIPE_WEBHOOK_SECRET")?,
        })
    }
}

impl RenewalConfig {
    /// Load scheduler settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` for unparseable or non-positive values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let interval_secs: u64 = parse_env_or_default("RENEWAL_INTERVAL_SECS", "300")?;
        let batch_size: i64 = parse_env_or_default("RENEWAL_BATCH_SIZE", "50")?;
        let max_failed_attempts: i32 = parse_env_or_default("RENEWAL_MAX_FAILED_ATTEMPTS", "3")?;
        let retry_delay_hours: i64 = parse_env_or_default("RENEWAL_RETRY_DELAY_HOURS", "24")?;

        if interval_secs == 0 {
            return Err(invalid("RENEWAL_INTERVAL_SECS", "must be positive"));
        }
        if batch_size <= 0 {
            return Err(invalid("RENEWAL_BATCH_SIZE", "must be positive"));
        }
        if max_failed_attempts <= 0 {
            return Err(invalid("RENEWAL_MAX_FAILED_ATTEMPTS", "must be positive"));
        }
        if retry_delay_hours < 0 {
            return Err(invalid("RENEWAL_RETRY_DELAY_HOURS", "cannot be negative"));
        }

        Ok(Self {
            enabled: parse_flag("RENEWAL_ENABLED", true)?,
            interval: Duration::from_secs(interval_secs),
            batch_size,
            max_failed_attempts,
            retry_delay: chrono::Duration::hours(retry_delay_hours),
            price_lock: parse_flag("SUBSCRIPTION_PRICE_LOCK", false)?,
        })
    }
}

impl EmailConfig {
    /// Load SMTP settings. `None` when `SMTP_HOST` is unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `SMTP_HOST` is set but another SMTP variable is not.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(smtp_host) = get_optional_env("SMTP_HOST") else {
            return Ok(None);
        };
        Ok(Some(Self {
            smtp_host,
            smtp_port: parse_env_or_default("SMTP_PORT", "587")?,
            smtp_username: get_required_env("SMTP_USERNAME")?,
            smtp_password: SecretString::from(get_required_env("SMTP_PASSWORD")?),
            from_address: get_required_env("SMTP_FROM")?,
        }))
    }
}

/// Load the pricing policy, falling back to the shop defaults.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` if a value does not parse or is out of range.
pub fn pricing_from_env() -> Result<PricingPolicy, ConfigError> {
    let defaults = PricingPolicy::default();
    let free_delivery_threshold = match std::env::var("PRICING_FREE_DELIVERY_THRESHOLD") {
        Ok(raw) if raw.trim().is_empty() => None,
        Ok(raw) => Some(parse_value::<Decimal>("PRICING_FREE_DELIVERY_THRESHOLD", &raw)?),
        Err(_) => defaults.free_delivery_threshold,
    };

    let policy = PricingPolicy {
        admin_fee_rate: parse_env_or("PRICING_ADMIN_FEE_RATE", defaults.admin_fee_rate)?,
        delivery_fee: parse_env_or("PRICING_DELIVERY_FEE", defaults.delivery_fee)?,
        free_delivery_threshold,
        tax_rate: parse_env_or("PRICING_TAX_RATE", defaults.tax_rate)?,
    };
    policy
        .validate()
        .map_err(|e| invalid("PRICING_*", &e.to_string()))?;
    Ok(policy)
}

// =============================================================================
// Helper Functions
// =============================================================================

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidEnvVar(key.to_string(), reason.to_string())
}

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, &get_env_or_default(key, default))
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key).map_or(Ok(default), |raw| parse_value(key, &raw))
}

fn parse_flag(key: &str, default: bool) -> Result<bool, ConfigError> {
    std::env::var(key).map_or(Ok(default), |raw| parse_bool(key, &raw))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(invalid(key, &format!("expected a boolean, got '{other}'"))),
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the key issued by the gateway."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let err = validate_secret_strength("sk_test_your-key-here", "STRIPE_SECRET_KEY").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaa", "STRIPE_SECRET_KEY");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_secret_strength_gateway_key() {
        let result =
            validate_secret_strength("sk_test_51Hq8ZkL2mN4pR7vXcYbT9wQ3", "STRIPE_SECRET_KEY");
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_bool_accepts_common_spellings() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_parse_value_reports_key() {
        let err = parse_value::<u16>("LARDER_PORT", "99999").unwrap_err();
        assert!(err.to_string().contains("LARDER_PORT"));
    }

    #[test]
    fn test_stripe_config_debug_redacts_secrets() {
        let config = StripeConfig {
            api_base: "https://api.stripe.com".to_string(),
            secret_key: SecretString::from("sk_live_abcdef123456"),
            webhook_secret: SecretString::from("whsec_abcdef123456"),
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk_live"));
        assert!(!debug.contains("whsec_"));
    }

    #[test]
    fn test_email_config_debug_redacts_password() {
        let config = EmailConfig {
            smtp_host: "smtp.mailgun.org".to_string(),
            smtp_port: 587,
            smtp_username: "postmaster".to_string(),
            smtp_password: SecretString::from("hunter2-really"),
            from_address: "Larder <orders@larder.shop>".to_string(),
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("smtp.mailgun.org"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_renewal_defaults() {
        let renewal = RenewalConfig::default();
        assert_eq!(renewal.batch_size, 50);
        assert_eq!(renewal.max_failed_attempts, 3);
        assert_eq!(renewal.retry_delay, chrono::Duration::hours(24));
        assert!(!renewal.price_lock);
    }
}
