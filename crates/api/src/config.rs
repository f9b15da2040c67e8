//! Configuration management

use std::time::Duration;

use tiersync_billing::{WebhookVerifier, DEFAULT_TOLERANCE, MAX_PAYLOAD_BYTES};

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// Stripe endpoint signing secret (whsec_...)
    pub stripe_webhook_secret: String,
    pub database_url: String,
    pub bind_address: String,
    /// Production deployments log JSON and omit error detail
    pub production: bool,
    pub webhook_tolerance_secs: u64,
    pub webhook_max_body_bytes: usize,
    pub request_timeout_secs: u64,
    pub run_migrations: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("stripe_webhook_secret", &"[redacted]")
            .field("database_url", &"[redacted]")
            .field("bind_address", &self.bind_address)
            .field("production", &self.production)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("webhook_max_body_bytes", &self.webhook_max_body_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of a
    /// variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        Ok(Self {
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            database_url: required("DATABASE_URL")?,
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            production: environment.eq_ignore_ascii_case("production"),
            webhook_tolerance_secs: parse_or(
                &lookup,
                "WEBHOOK_TOLERANCE_SECS",
                DEFAULT_TOLERANCE.as_secs(),
            )?,
            webhook_max_body_bytes: parse_or(&lookup, "WEBHOOK_MAX_BODY_BYTES", MAX_PAYLOAD_BYTES)?,
            request_timeout_secs: parse_or(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            run_migrations: parse_bool_or(&lookup, "RUN_MIGRATIONS", true)?,
        })
    }

    /// Signature verifier for the configured secret and limits
    pub fn webhook_verifier(&self) -> WebhookVerifier {
        WebhookVerifier::new(self.stripe_webhook_secret.clone())
            .with_tolerance(Duration::from_secs(self.webhook_tolerance_secs))
            .with_max_payload_bytes(self.webhook_max_body_bytes)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).map(|raw| raw.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                reason: format!("{raw:?} is not a boolean"),
            }),
        },
    }
}
