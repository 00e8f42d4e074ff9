//! Queue configuration.

use serde::{Deserialize, Serialize};
use std::env;

/// Storage key used when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "offline_queue";

/// Retry ceiling used when none is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    /// Storage key the queue is persisted under
    pub storage_key: String,
    /// Failed attempts after which an item stops being replayed and becomes
    /// eligible for [`purge_exhausted`](crate::QueueManager::purge_exhausted)
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl QueueConfig {
    /// Load configuration from environment variables.
    ///
    /// - `OFFLINE_QUEUE_KEY` (default `offline_queue`)
    /// - `OFFLINE_QUEUE_MAX_RETRIES` (default `3`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let storage_key = lookup("OFFLINE_QUEUE_KEY")
            .unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_string());
        if storage_key.trim().is_empty() {
            return Err(ConfigError::EmptyStorageKey);
        }

        let max_retries = match lookup("OFFLINE_QUEUE_MAX_RETRIES") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidMaxRetries(raw))?,
            None => DEFAULT_MAX_RETRIES,
        };

        Ok(Self {
            storage_key,
            max_retries,
        })
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("OFFLINE_QUEUE_KEY must not be empty")]
    EmptyStorageKey,

    #[error("Invalid OFFLINE_QUEUE_MAX_RETRIES value: {0}")]
    InvalidMaxRetries(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Config(err.to_string())
    }
}
