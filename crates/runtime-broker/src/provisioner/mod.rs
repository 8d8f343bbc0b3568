//! Provisioner API client.
//!
//! The provisioner creates and removes the actual clusters. Every call is
//! asynchronous on its side: it answers with an operation id that is polled
//! through [`ProvisionerClient::runtime_operation_status`].
//!
//! Create and remove requests carry a request id (the broker operation id).
//! The provisioner answers a repeated request id with the operation it
//! already started, so a step that lost the answer can simply ask again.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpProvisionerClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Labels attached to a runtime.
pub type Labels = BTreeMap<String, String>;

/// Request to create a runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRuntimeInput {
    pub runtime_name: String,
    pub global_account_id: String,
    pub subaccount_id: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub plan_id: String,
    #[serde(default)]
    pub labels: Labels,
}

/// Provisioner answer to a create request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerOperation {
    pub operation_id: String,
    pub runtime_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeOperationState {
    InProgress,
    Succeeded,
    Failed,
}

/// Status of a provisioner operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeOperationStatus {
    pub operation_id: String,
    pub state: RuntimeOperationState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub runtime_id: Option<String>,
    #[serde(default)]
    pub shoot_name: Option<String>,
    #[serde(default)]
    pub shoot_domain: Option<String>,
}

/// Errors returned by the provisioner client.
#[derive(Error, Debug)]
pub enum ProvisionerError {
    /// Connection failure or timeout.
    #[error("Provisioner unreachable: {0}")]
    Transport(String),

    #[error("Provisioner resource not found: {0}")]
    NotFound(String),

    /// Any non-success answer other than 404.
    #[error("Provisioner returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid provisioner response: {0}")]
    Decode(String),
}

impl ProvisionerError {
    /// Errors worth retrying: transport failures, throttling and 5xx.
    pub fn is_temporary(&self) -> bool {
        match self {
            ProvisionerError::Transport(_) => true,
            ProvisionerError::Status { status, .. } => *status == 429 || *status >= 500,
            ProvisionerError::NotFound(_) | ProvisionerError::Decode(_) => false,
        }
    }
}

/// Operations the broker needs from the provisioner.
#[async_trait]
pub trait ProvisionerClient: Send + Sync {
    /// Start creating a runtime.
    async fn provision_runtime(
        &self,
        request_id: &str,
        input: &ProvisionRuntimeInput,
    ) -> Result<ProvisionerOperation, ProvisionerError>;

    /// Start removing a runtime; returns the provisioner operation id.
    async fn deprovision_runtime(
        &self,
        request_id: &str,
        runtime_id: &str,
    ) -> Result<String, ProvisionerError>;

    async fn runtime_operation_status(
        &self,
        operation_id: &str,
    ) -> Result<RuntimeOperationStatus, ProvisionerError>;

    async fn upgrade_runtime_labels(
        &self,
        runtime_id: &str,
        labels: &Labels,
    ) -> Result<(), ProvisionerError>;
}
