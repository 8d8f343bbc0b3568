//! Provisioner HTTP client.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::{
    Labels, ProvisionRuntimeInput, ProvisionerClient, ProvisionerError, ProvisionerOperation,
    RuntimeOperationStatus,
};

/// JSON over HTTP client for the provisioner API.
#[derive(Clone)]
pub struct HttpProvisionerClient {
    client: reqwest::Client,
    server_url: String,
}

/// Header carrying the request id of create and remove calls.
const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

#[derive(Deserialize)]
struct OperationAccepted {
    operation_id: String,
}

impl HttpProvisionerClient {
    pub fn new(server_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn check(response: Response, resource: &str) -> Result<Response, ProvisionerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ProvisionerError::NotFound(resource.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProvisionerError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProvisionerError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ProvisionerError::Decode(e.to_string()))
    }
}

fn transport(e: reqwest::Error) -> ProvisionerError {
    ProvisionerError::Transport(e.to_string())
}

#[async_trait]
impl ProvisionerClient for HttpProvisionerClient {
    async fn provision_runtime(
        &self,
        request_id: &str,
        input: &ProvisionRuntimeInput,
    ) -> Result<ProvisionerOperation, ProvisionerError> {
        let response = self
            .client
            .post(format!("{}/runtimes", self.server_url))
            .header(IDEMPOTENCY_KEY, request_id)
            .json(input)
            .send()
            .await
            .map_err(transport)?;

        let response = Self::check(response, &input.runtime_name).await?;
        let operation: ProvisionerOperation = Self::decode(response).await?;

        tracing::debug!(
            runtime_id = %operation.runtime_id,
            provisioner_operation_id = %operation.operation_id,
            "Runtime creation accepted"
        );
        Ok(operation)
    }

    async fn deprovision_runtime(
        &self,
        request_id: &str,
        runtime_id: &str,
    ) -> Result<String, ProvisionerError> {
        let response = self
            .client
            .delete(format!("{}/runtimes/{}", self.server_url, runtime_id))
            .header(IDEMPOTENCY_KEY, request_id)
            .send()
            .await
            .map_err(transport)?;

        let response = Self::check(response, runtime_id).await?;
        let accepted: OperationAccepted = Self::decode(response).await?;
        Ok(accepted.operation_id)
    }

    async fn runtime_operation_status(
        &self,
        operation_id: &str,
    ) -> Result<RuntimeOperationStatus, ProvisionerError> {
        let response = self
            .client
            .get(format!("{}/operations/{}", self.server_url, operation_id))
            .send()
            .await
            .map_err(transport)?;

        let response = Self::check(response, operation_id).await?;
        Self::decode(response).await
    }

    async fn upgrade_runtime_labels(
        &self,
        runtime_id: &str,
        labels: &Labels,
    ) -> Result<(), ProvisionerError> {
        let response = self
            .client
            .put(format!("{}/runtimes/{}/labels", self.server_url, runtime_id))
            .json(labels)
            .send()
            .await
            .map_err(transport)?;

        Self::check(response, runtime_id).await?;
        Ok(())
    }
}
