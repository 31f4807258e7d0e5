//! Configuration loading and representation.
//!
//! Everything comes from environment variables; `from_lookup` takes the
//! lookup function so tests never touch the process environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use storefront_core::TaxRate;
use storefront_observability::LogFormat;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("{key} is required when {reason}")]
    Missing {
        key: &'static str,
        reason: &'static str,
    },
}

/// Sandbox webhook secret used when none is configured.
pub const SANDBOX_WEBHOOK_SECRET: &str = "whsec_sandbox";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub log_format: LogFormat,
    pub tax_rate: TaxRate,
    pub currency: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    /// `None` means the sandbox secret is in use.
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
    pub processor_timeout: Duration,
    pub notify_timeout: Duration,
    pub notify_customer_confirmation: bool,
    pub owner_email: String,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub catalog_seed_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_format: LogFormat::Json,
            tax_rate: TaxRate::from_bps(1300).unwrap_or_default(),
            currency: "cad".to_string(),
            checkout_success_url: "http://localhost:3000/order-success".to_string(),
            checkout_cancel_url: "http://localhost:3000/payment-failed".to_string(),
            webhook_secret: None,
            webhook_tolerance_secs: 300,
            processor_timeout: Duration::from_millis(5_000),
            notify_timeout: Duration::from_millis(3_000),
            notify_customer_confirmation: false,
            owner_email: "orders@localhost".to_string(),
            use_persistent_stores: false,
            database_url: None,
            catalog_seed_path: None,
        }
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(invalid(key, format!("'{other}' is not a boolean"))),
    }
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let ms: u64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(key, format!("'{raw}' is not a number of milliseconds")))?;
    if ms == 0 {
        return Err(invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; unset and empty values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(raw) = get("BIND_ADDR") {
            settings.bind_addr = raw
                .trim()
                .parse()
                .map_err(|_| invalid("BIND_ADDR", format!("'{raw}' is not a socket address")))?;
        }
        if let Some(raw) = get("LOG_FORMAT") {
            settings.log_format = raw.parse().map_err(|e| invalid("LOG_FORMAT", format!("{e}")))?;
        }
        if let Some(raw) = get("TAX_RATE_BPS") {
            let bps: u32 = raw
                .trim()
                .parse()
                .map_err(|_| invalid("TAX_RATE_BPS", format!("'{raw}' is not an integer")))?;
            settings.tax_rate =
                TaxRate::from_bps(bps).map_err(|e| invalid("TAX_RATE_BPS", e.to_string()))?;
        }
        if let Some(raw) = get("CURRENCY") {
            let currency = raw.trim().to_ascii_lowercase();
            if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(invalid("CURRENCY", format!("'{raw}' is not an ISO currency code")));
            }
            settings.currency = currency;
        }
        if let Some(raw) = get("CHECKOUT_SUCCESS_URL") {
            settings.checkout_success_url = raw.trim().to_string();
        }
        if let Some(raw) = get("CHECKOUT_CANCEL_URL") {
            settings.checkout_cancel_url = raw.trim().to_string();
        }
        settings.webhook_secret = get("WEBHOOK_SECRET");
        if let Some(raw) = get("WEBHOOK_TOLERANCE_SECS") {
            settings.webhook_tolerance_secs = raw
                .trim()
                .parse::<u32>()
                .map(i64::from)
                .map_err(|_| invalid("WEBHOOK_TOLERANCE_SECS", format!("'{raw}' is not a number of seconds")))?;
        }
        if let Some(raw) = get("PROCESSOR_TIMEOUT_MS") {
            settings.processor_timeout = parse_millis("PROCESSOR_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = get("NOTIFY_TIMEOUT_MS") {
            settings.notify_timeout = parse_millis("NOTIFY_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = get("NOTIFY_CUSTOMER_CONFIRMATION") {
            settings.notify_customer_confirmation =
                parse_bool("NOTIFY_CUSTOMER_CONFIRMATION", &raw)?;
        }
        if let Some(raw) = get("OWNER_EMAIL") {
            if !raw.contains('@') {
                return Err(invalid("OWNER_EMAIL", format!("'{raw}' is not an email address")));
            }
            settings.owner_email = raw.trim().to_string();
        }
        if let Some(raw) = get("USE_PERSISTENT_STORES") {
            settings.use_persistent_stores = parse_bool("USE_PERSISTENT_STORES", &raw)?;
        }
        settings.database_url = get("DATABASE_URL");
        settings.catalog_seed_path = get("CATALOG_SEED_PATH").map(PathBuf::from);

        if settings.use_persistent_stores && settings.database_url.is_none() {
            return Err(ConfigError::Missing {
                key: "DATABASE_URL",
                reason: "USE_PERSISTENT_STORES is enabled",
            });
        }

        Ok(settings)
    }

    /// Secret used to authenticate webhooks.
    pub fn effective_webhook_secret(&self) -> &str {
        self.webhook_secret
            .as_deref()
            .unwrap_or(SANDBOX_WEBHOOK_SECRET)
    }
}
