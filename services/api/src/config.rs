//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::Duration;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
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
    pub audio_dir: PathBuf,
    pub secret_key: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// `None` allows any origin.
    pub cors_origin: Option<String>,
    pub max_upload_bytes: usize,
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
        Self::from_vars(std::env::vars().collect())
    }

    /// Builds the configuration from an explicit variable map.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).filter(|v| !v.trim().is_empty()).cloned();

        // --- Server and Database Settings ---
        let bind_address_str = get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            get("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = get("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let audio_dir = get("AUDIO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        // --- Token Settings ---
        let secret_key =
            get("SECRET_KEY").ok_or_else(|| ConfigError::MissingVar("SECRET_KEY".to_string()))?;
        let access_token_ttl = parse_ttl(
            get("ACCESS_TOKEN_MIN"),
            "ACCESS_TOKEN_MIN",
            60,
            Duration::try_minutes,
        )?;
        let refresh_token_ttl = parse_ttl(
            get("REFRESH_TOKEN_DAYS"),
            "REFRESH_TOKEN_DAYS",
            7,
            Duration::try_days,
        )?;

        // --- HTTP Settings ---
        let cors_origin = get("CORS_ORIGIN");
        let max_upload_bytes =
            parse_positive(get("MAX_UPLOAD_BYTES"), "MAX_UPLOAD_BYTES", 10 * 1024 * 1024)? as usize;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            audio_dir,
            secret_key,
            access_token_ttl,
            refresh_token_ttl,
            cors_origin,
            max_upload_bytes,
        })
    }
}

/// Token lifetimes must be representable and must still yield a valid expiry when
/// added to the current time.
fn parse_ttl(
    raw: Option<String>,
    key: &str,
    default: i64,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError> {
    let amount = parse_positive(raw, key, default)?;
    unit(amount)
        .filter(|ttl| chrono::Utc::now().checked_add_signed(*ttl).is_some())
        .ok_or_else(|| {
            ConfigError::InvalidValue(key.to_string(), format!("{} is too large", amount))
        })
}

fn parse_positive(raw: Option<String>, key: &str, default: i64) -> Result<i64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<i64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("'{}' is not a positive integer", raw),
        )),
    }
}
