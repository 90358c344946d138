//! Configuration module for collection-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::services::duplicate_guard::{DuplicatePolicy, GuardMode};

#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub request_timeout: Duration,
    pub duplicate_guard: DuplicatePolicy,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub lock_timeout_ms: u64,
}

/// Parse an optional variable, failing on a value that is present but malformed.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}'", name, raw))
        }),
        _ => Ok(default),
    }
}

impl CollectionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "collection-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_var("DATABASE_MIN_CONNECTIONS", 2)?,
                lock_timeout_ms: parse_var("DATABASE_LOCK_TIMEOUT_MS", 3000)?,
            },
            request_timeout: Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", 10)?),
            duplicate_guard: duplicate_policy_from_env()?,
        })
    }
}

/// Duplicate guard policy from `DUPLICATE_GUARD_*`.
pub fn duplicate_policy_from_env() -> Result<DuplicatePolicy, AppError> {
    let window_minutes: i64 = parse_var("DUPLICATE_GUARD_WINDOW_MINUTES", 10)?;
    if window_minutes <= 0 {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "DUPLICATE_GUARD_WINDOW_MINUTES must be positive"
        )));
    }

    let mode = match env::var("DUPLICATE_GUARD_MODE") {
        Ok(raw) if !raw.trim().is_empty() => raw
            .parse::<GuardMode>()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        _ => GuardMode::Standard,
    };

    Ok(DuplicatePolicy {
        window: chrono::Duration::minutes(window_minutes),
        mode,
        cross_movement: parse_var("DUPLICATE_GUARD_CROSS_MOVEMENT", false)?,
    })
}
