//! Broker configuration.

use serde::Deserialize;
use std::time::Duration;

use process_engine::QueueConfig;

/// Where operations are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

/// Broker configuration loaded from environment variables.
///
/// Environment variables are prefixed with `BROKER_`:
/// - `BROKER_HOST`: Server bind address (default: "0.0.0.0")
/// - `BROKER_PORT`: Server port (default: 8080)
/// - `BROKER_STORAGE`: `memory` or `postgres` (default: memory)
/// - `BROKER_WORKERS`: Operations processed concurrently per queue (default: 4)
/// - `BROKER_PROVISIONER_URL`: Base URL of the provisioner API
/// - `BROKER_PROVISIONING_TIMEOUT`: Seconds a runtime may take to become ready (default: 3600)
/// - `BROKER_DEPROVISIONING_TIMEOUT`: Seconds a runtime may take to be removed (default: 3600)
/// - `BROKER_STATUS_POLL_INTERVAL`: Seconds between provisioner status checks (default: 30)
/// - `BROKER_PROVISIONER_RETRY_INTERVAL`: Seconds before retrying a failed provisioner call (default: 10)
/// - `BROKER_PROVISIONER_RETRY_TIMEOUT`: Seconds provisioner calls are retried before giving up (default: 900)
/// - `BROKER_REQUEST_TIMEOUT`: HTTP timeout for provisioner calls in seconds (default: 30)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_storage")]
    pub storage: StorageBackend,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_provisioner_url")]
    pub provisioner_url: String,

    #[serde(default = "default_operation_timeout")]
    pub provisioning_timeout: u64,

    #[serde(default = "default_operation_timeout")]
    pub deprovisioning_timeout: u64,

    #[serde(default = "default_status_poll_interval")]
    pub status_poll_interval: u64,

    #[serde(default = "default_provisioner_retry_interval")]
    pub provisioner_retry_interval: u64,

    #[serde(default = "default_provisioner_retry_timeout")]
    pub provisioner_retry_timeout: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage() -> StorageBackend {
    StorageBackend::Memory
}

fn default_workers() -> usize {
    4
}

fn default_provisioner_url() -> String {
    "http://localhost:3050".to_string()
}

fn default_operation_timeout() -> u64 {
    3600
}

fn default_status_poll_interval() -> u64 {
    30
}

fn default_provisioner_retry_interval() -> u64 {
    10
}

fn default_provisioner_retry_timeout() -> u64 {
    900
}

fn default_request_timeout() -> u64 {
    30
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("BROKER_").from_env::<AppConfig>()
    }

    /// Get the server bind address as a string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout)
    }

    pub fn deprovisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.deprovisioning_timeout)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_interval)
    }

    pub fn provisioner_retry_interval(&self) -> Duration {
        Duration::from_secs(self.provisioner_retry_interval)
    }

    pub fn provisioner_retry_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioner_retry_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Queue settings for one of the operation pipelines.
    pub fn queue_config(&self, name: &str) -> QueueConfig {
        QueueConfig::new(name, self.workers)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage: default_storage(),
            workers: default_workers(),
            provisioner_url: default_provisioner_url(),
            provisioning_timeout: default_operation_timeout(),
            deprovisioning_timeout: default_operation_timeout(),
            status_poll_interval: default_status_poll_interval(),
            provisioner_retry_interval: default_provisioner_retry_interval(),
            provisioner_retry_timeout: default_provisioner_retry_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.provisioning_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn test_bind_address() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_storage_backend_names() {
        let backend: StorageBackend = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(backend, StorageBackend::Postgres);
        assert!(serde_json::from_str::<StorageBackend>("\"redis\"").is_err());
    }

    #[test]
    fn test_queue_config_has_at_least_one_worker() {
        let config = AppConfig {
            workers: 0,
            ..Default::default()
        };
        assert_eq!(config.queue_config("provisioning").workers, 1);
    }
}
