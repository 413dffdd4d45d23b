//! Configuration module for ledger-engine.

use crate::services::{PropagationLimits, RetryConfig};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub propagation: PropagationConfig,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PropagationConfig {
    pub max_forward_snapshots: usize,
    pub deadline_ms: u64,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_vars(common, |key| env::var(key).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_vars(
        common: core_config::Config,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            common,
            service_name: var("SERVICE_NAME").unwrap_or_else(|| "ledger-engine".to_string()),
            service_version: var("SERVICE_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            otlp_endpoint: var("OTLP_ENDPOINT").filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: var("DATABASE_URL").ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parsed(&var, "DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parsed(&var, "DATABASE_MIN_CONNECTIONS", 2),
            },
            propagation: PropagationConfig {
                max_forward_snapshots: parsed(&var, "LEDGER_MAX_FORWARD_SNAPSHOTS", 10_000),
                deadline_ms: parsed(&var, "LEDGER_PROPAGATION_DEADLINE_MS", 5_000),
            },
            max_retries: parsed(&var, "LEDGER_MAX_RETRIES", 3),
        })
    }

    pub fn propagation_limits(&self) -> PropagationLimits {
        PropagationLimits {
            max_forward_snapshots: self.propagation.max_forward_snapshots,
            deadline: Duration::from_millis(self.propagation.deadline_ms),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_max_retries(self.max_retries)
    }
}

/// Unset or unparsable values fall back to `default`.
fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}
