//! Runtime configuration, read from the environment.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::store::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{key}: invalid value '{value}': {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// `None` selects the in-process store.
    pub database: Option<DatabaseConfig>,
    pub retry: RetryPolicy,
}

impl LedgerConfig {
    pub const DATABASE_URL: &'static str = "DATABASE_URL";
    pub const MAX_CONNECTIONS: &'static str = "LEDGER_MAX_CONNECTIONS";
    pub const ACQUIRE_TIMEOUT_SECS: &'static str = "LEDGER_ACQUIRE_TIMEOUT_SECS";
    pub const RUN_MIGRATIONS: &'static str = "LEDGER_RUN_MIGRATIONS";
    pub const RETRY_ATTEMPTS: &'static str = "LEDGER_RETRY_ATTEMPTS";
    pub const RETRY_BACKOFF_MS: &'static str = "LEDGER_RETRY_BACKOFF_MS";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let attempts: u32 = parse(&lookup, Self::RETRY_ATTEMPTS, RetryPolicy::DEFAULT_ATTEMPTS)?;
        if attempts == 0 {
            return Err(ConfigError {
                key: Self::RETRY_ATTEMPTS,
                value: attempts.to_string(),
                reason: "at least one attempt is required".into(),
            });
        }
        let backoff_ms: u64 = parse(
            &lookup,
            Self::RETRY_BACKOFF_MS,
            RetryPolicy::DEFAULT_BACKOFF.as_millis() as u64,
        )?;

        let database = match lookup(Self::DATABASE_URL).filter(|url| !url.trim().is_empty()) {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: parse(&lookup, Self::MAX_CONNECTIONS, 5)?,
                acquire_timeout: Duration::from_secs(parse(
                    &lookup,
                    Self::ACQUIRE_TIMEOUT_SECS,
                    5,
                )?),
                run_migrations: parse(&lookup, Self::RUN_MIGRATIONS, true)?,
            }),
            None => None,
        };

        Ok(Self {
            database,
            retry: RetryPolicy::new(attempts, Duration::from_millis(backoff_ms)),
        })
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database: None,
            retry: RetryPolicy::default(),
        }
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError {
                key,
                reason: e.to_string(),
                value,
            })
        }
    }
}
