//! Process configuration, read from the environment (and `.env` via `dotenvy` in `main`).

use std::net::SocketAddr;

use thiserror::Error;
use uuid::Uuid;

use forgebill_core::CustomerId;
use forgebill_infra::DEFAULT_PAYMENT_MAX_RETRIES;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),

    #[error("invalid {var}='{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Where invoices live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Process-local stores; customers come from `DEV_CUSTOMER_IDS`.
    InMemory { customers: Vec<CustomerId> },
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    pub payment_max_retries: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map instead of mutating the
    /// process environment).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_raw = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            var: "BIND_ADDR",
            value: bind_raw.clone(),
            reason: e.to_string(),
        })?;

        let persistent = match var("USE_PERSISTENT_STORES") {
            None => false,
            Some(v) => parse_bool("USE_PERSISTENT_STORES", &v)?,
        };

        let storage = if persistent {
            let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let max_connections = match var("DATABASE_MAX_CONNECTIONS") {
                None => DEFAULT_MAX_CONNECTIONS,
                Some(v) => parse_positive("DATABASE_MAX_CONNECTIONS", &v)?,
            };
            StorageConfig::Postgres {
                database_url,
                max_connections,
            }
        } else {
            let customers = match var("DEV_CUSTOMER_IDS") {
                None => Vec::new(),
                Some(v) => parse_customer_ids(&v)?,
            };
            StorageConfig::InMemory { customers }
        };

        let payment_max_retries = match var("PAYMENT_MAX_RETRIES") {
            None => DEFAULT_PAYMENT_MAX_RETRIES,
            Some(v) => v.parse::<u32>().map_err(|e| ConfigError::Invalid {
                var: "PAYMENT_MAX_RETRIES",
                value: v.clone(),
                reason: e.to_string(),
            })?,
        };

        Ok(Self {
            bind_addr,
            storage,
            payment_max_retries,
        })
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected true/false".to_string(),
        }),
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<u32, ConfigError> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected a positive integer".to_string(),
        }),
    }
}

fn parse_customer_ids(value: &str) -> Result<Vec<CustomerId>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s)
                .map(CustomerId::from_uuid)
                .map_err(|e| ConfigError::Invalid {
                    var: "DEV_CUSTOMER_IDS",
                    value: s.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}
