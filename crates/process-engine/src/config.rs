//! Process engine configuration.

use serde::Deserialize;
use std::time::Duration;

/// Retry intervals used by the engine and the operation manager.
///
/// Environment variables are prefixed with `PROCESS_`:
/// - `PROCESS_CONFLICT_RETRY_SECONDS`: delay after an optimistic-lock conflict (default: 10)
/// - `PROCESS_STORAGE_RETRY_SECONDS`: delay after any other storage failure (default: 30)
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// Seconds to wait before retrying after a version conflict.
    #[serde(default = "default_conflict_retry_seconds")]
    pub conflict_retry_seconds: u64,

    /// Seconds to wait before retrying after a storage failure.
    #[serde(default = "default_storage_retry_seconds")]
    pub storage_retry_seconds: u64,
}

fn default_conflict_retry_seconds() -> u64 {
    10
}

fn default_storage_retry_seconds() -> u64 {
    30
}

impl ProcessConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("PROCESS_").from_env::<ProcessConfig>()
    }

    pub fn conflict_retry_interval(&self) -> Duration {
        Duration::from_secs(self.conflict_retry_seconds)
    }

    pub fn storage_retry_interval(&self) -> Duration {
        Duration::from_secs(self.storage_retry_seconds)
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            conflict_retry_seconds: default_conflict_retry_seconds(),
            storage_retry_seconds: default_storage_retry_seconds(),
        }
    }
}

/// Worker queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Queue name, used in log lines.
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Maximum operations processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_queue_name() -> String {
    "operations".to_string()
}

fn default_workers() -> usize {
    4
}

impl QueueConfig {
    pub fn new(name: &str, workers: usize) -> Self {
        Self {
            name: name.to_string(),
            workers: workers.max(1),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            workers: default_workers(),
        }
    }
}
