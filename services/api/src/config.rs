//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;

use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    /// Master secret: derives the email cipher key, the email lookup key and
    /// the action-token signing key. Required; missing it aborts startup.
    pub encryption_key: String,
    /// Public origin used when building links embedded in emails.
    pub base_url: String,
    pub from_email: String,
    pub sendgrid_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub recap_model: String,
    /// Default subscriber-local hour (0-23) at which the daily chunk goes out.
    pub delivery_hour: i32,
    /// Minimum minutes between manual "send next part" requests.
    pub binge_cooldown_minutes: i64,
    /// Concurrent books processed by the recap backfill worker.
    pub backfill_workers: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Secrets ---
        let encryption_key = std::env::var("ENCRYPTION_KEY")
            .map_err(|_| ConfigError::MissingVar("ENCRYPTION_KEY".to_string()))?;

        // --- Mail Settings ---
        let base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| "https://dailylitbits.com".to_string());
        let from_email =
            std::env::var("FROM_EMAIL").unwrap_or_else(|_| "reader@dailylitbits.com".to_string());
        let sendgrid_api_key = std::env::var("SENDGRID_API_KEY").ok();

        // --- AI Settings ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let recap_model =
            std::env::var("RECAP_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        // --- Dispatch Settings ---
        let delivery_hour = parse_var_or("DELIVERY_HOUR", 6)?;
        if !(0..24).contains(&delivery_hour) {
            return Err(ConfigError::InvalidValue(
                "DELIVERY_HOUR".to_string(),
                format!("{} is not an hour between 0 and 23", delivery_hour),
            ));
        }
        let binge_cooldown_minutes = parse_var_or("BINGE_COOLDOWN_MINUTES", 5)?;
        let backfill_workers = parse_var_or("BACKFILL_WORKERS", 10)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            encryption_key,
            base_url,
            from_email,
            sendgrid_api_key,
            openai_api_key,
            recap_model,
            delivery_hour,
            binge_cooldown_minutes,
            backfill_workers,
        })
    }
}

fn parse_var_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("'{}' failed to parse", raw))
        }),
        Err(_) => Ok(default),
    }
}
