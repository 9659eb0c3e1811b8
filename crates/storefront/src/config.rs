//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//! - `STOREFRONT_SESSION_SECRET` - Session signing secret (min 32 chars, high entropy)
//! - `PAYMENT_WEBHOOK_SECRET` - Shared secret for payment provider callback signatures
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STORE_CURRENCY` - Currency orders are placed in (default: USD)
//! - `SUPPORT_EMAIL` / `SUPPORT_PHONE` - Customer-care contact shown on partial stock
//! - `STOCK_CACHE_TTL_SECS` - Read cache TTL (default: 30)
//! - `STOCK_VALIDATION_BATCH_SIZE` - Products per validation batch (default: 10)
//! - `STOCK_VALIDATION_CONCURRENCY` - Batches in flight (default: 4)
//! - `STOCK_VALIDATION_TIMEOUT_MS` - Overall validation deadline (default: 5000)
//! - `CHECKOUT_RATE_LIMIT_PER_MINUTE` - Checkout attempts per client IP (default: 10)
//! - `CHECKOUT_RATE_LIMIT_BURST` - Checkout burst allowance (default: 5)
//! - `ORDER_MAX_TOTAL` - Upper sanity bound for an order total (default: 1000000)
//! - `JANITOR_INTERVAL_SECS` - Lifecycle sweep interval (default: 300)
//! - `PENDING_ORDER_TTL_MINS` - Age after which unpaid orders fail (default: 60)
//! - `FAILED_ORDER_TTL_HOURS` - Age after which failed orders are deleted (default: 24)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use orchard_core::CurrencyCode;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;

const MIN_SESSION_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
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

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Session signing secret
    pub session_secret: SecretString,
    /// HMAC secret for payment provider callbacks
    pub payment_webhook_secret: SecretString,
    /// Customer-care contact
    pub support: SupportContact,
    /// Order processing tunables
    pub commerce: CommerceConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Customer-care contact block attached to partial-stock responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupportContact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl SupportContact {
    /// Load from `SUPPORT_EMAIL` / `SUPPORT_PHONE`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            email: get_optional_env("SUPPORT_EMAIL"),
            phone: get_optional_env("SUPPORT_PHONE"),
        }
    }
}

/// Tunables for cart, checkout and the order lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommerceConfig {
    /// Currency every order is placed in.
    pub currency: CurrencyCode,
    /// Read cache time-to-live.
    pub cache_ttl: Duration,
    /// Products per stock validation batch.
    pub validation_batch_size: usize,
    /// Validation batches in flight at once.
    pub validation_concurrency: usize,
    /// Deadline for a whole validation run.
    pub validation_timeout: Duration,
    /// Checkout attempts allowed per client per minute.
    pub checkout_rate_per_minute: u32,
    /// Checkout burst allowance per client.
    pub checkout_burst: u32,
    /// Upper sanity bound for an order total.
    pub max_order_total: Decimal,
    /// Interval between background lifecycle sweeps.
    pub janitor_interval: Duration,
    /// Age after which a pending order is marked failed.
    pub pending_order_ttl: TimeDelta,
    /// Age after which a failed order is deleted.
    pub failed_order_ttl: TimeDelta,
}

impl Default for CommerceConfig {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::USD,
            cache_ttl: Duration::from_secs(30),
            validation_batch_size: 10,
            validation_concurrency: 4,
            validation_timeout: Duration::from_millis(5000),
            checkout_rate_per_minute: 10,
            checkout_burst: 5,
            max_order_total: Decimal::from(1_000_000),
            janitor_interval: Duration::from_secs(300),
            pending_order_ttl: TimeDelta::minutes(60),
            failed_order_ttl: TimeDelta::hours(24),
        }
    }
}

impl CommerceConfig {
    /// Load tunables from the environment, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if a variable is set but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let currency = get_env_or_default("STORE_CURRENCY", defaults.currency.code())
            .parse::<CurrencyCode>()
            .map_err(|e| ConfigError::InvalidEnvVar("STORE_CURRENCY".to_string(), e.to_string()))?;

        Ok(Self {
            currency,
            cache_ttl: Duration::from_secs(get_parsed_env("STOCK_CACHE_TTL_SECS", 30)?),
            validation_batch_size: get_parsed_env::<usize>("STOCK_VALIDATION_BATCH_SIZE", 10)?
                .max(1),
            validation_concurrency: get_parsed_env::<usize>("STOCK_VALIDATION_CONCURRENCY", 4)?
                .max(1),
            validation_timeout: Duration::from_millis(get_parsed_env(
                "STOCK_VALIDATION_TIMEOUT_MS",
                5000,
            )?),
            checkout_rate_per_minute: get_parsed_env("CHECKOUT_RATE_LIMIT_PER_MINUTE", 10)?,
            checkout_burst: get_parsed_env("CHECKOUT_RATE_LIMIT_BURST", 5)?,
            max_order_total: get_parsed_env("ORDER_MAX_TOTAL", defaults.max_order_total)?,
            janitor_interval: Duration::from_secs(get_parsed_env("JANITOR_INTERVAL_SECS", 300)?),
            pending_order_ttl: TimeDelta::minutes(get_parsed_env("PENDING_ORDER_TTL_MINS", 60)?),
            failed_order_ttl: TimeDelta::hours(get_parsed_env("FAILED_ORDER_TTL_HOURS", 24)?),
        })
    }
}

impl StorefrontConfig {
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

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = get_env_or_default("STOREFRONT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_HOST".to_string(), e.to_string())
            })?;
        let port = get_env_or_default("STOREFRONT_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_PORT".to_string(), e.to_string())
            })?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;
        let session_secret = get_validated_secret("STOREFRONT_SESSION_SECRET")?;
        validate_session_secret(&session_secret, "STOREFRONT_SESSION_SECRET")?;
        let payment_webhook_secret = get_validated_secret("PAYMENT_WEBHOOK_SECRET")?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            session_secret,
            payment_webhook_secret,
            support: SupportContact::from_env(),
            commerce: CommerceConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Database URL for tools that only need a connection (CLI).
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if neither variable is set.
pub fn database_url_from_env() -> Result<SecretString, ConfigError> {
    let _ = dotenvy::dotenv();
    get_database_url("STOREFRONT_DATABASE_URL")
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable, treating blank values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, using `default` when unset.
fn get_parsed_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Validate that a session secret meets minimum length requirements.
fn validate_session_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SESSION_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SESSION_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
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
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
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
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
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
