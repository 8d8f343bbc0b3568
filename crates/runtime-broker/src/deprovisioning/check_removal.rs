//! Polling of the runtime removal.

use async_trait::async_trait;

use process_engine::{Operation, Step, StepOutcome};

use crate::pipelines::{timed_out, StepDependencies};
use crate::provisioner::{ProvisionerError, RuntimeOperationState};

/// Waits until the provisioner reports the runtime as removed.
pub struct CheckRuntimeRemovalStep {
    deps: StepDependencies,
}

impl CheckRuntimeRemovalStep {
    pub fn new(deps: &StepDependencies) -> Self {
        Self { deps: deps.clone() }
    }
}

#[async_trait]
impl Step for CheckRuntimeRemovalStep {
    fn name(&self) -> &str {
        "check_runtime_removal"
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        let operations = &self.deps.operations;
        let config = &self.deps.config;

        // No removal was requested when there was no runtime.
        let Some(provisioner_operation_id) = operation.instance_details.provisioner_operation_id.clone() else {
            return StepOutcome::Completed(operation);
        };

        if timed_out(&operation, config.deprovisioning_timeout()) {
            return operations
                .operation_failed(
                    operation,
                    "Runtime deprovisioning timed out",
                    &format!("no result after {}s", config.deprovisioning_timeout),
                )
                .await;
        }

        let status = match self
            .deps
            .provisioner
            .runtime_operation_status(&provisioner_operation_id)
            .await
        {
            Ok(status) => status,
            Err(ProvisionerError::NotFound(_)) => {
                tracing::warn!(provisioner_operation_id = %provisioner_operation_id, "Removal operation unknown to provisioner");
                return StepOutcome::Completed(operation);
            }
            Err(e) => {
                return self
                    .deps
                    .provisioner_failure(operation, "Cannot read runtime removal status", &e)
                    .await;
            }
        };

        match status.state {
            RuntimeOperationState::Succeeded => {
                tracing::info!("Runtime removed");
                let (operation, retry) = operations
                    .update_operation(operation, |op| op.description = "Runtime removed".to_string())
                    .await;
                StepOutcome::retry(operation, retry)
            }
            RuntimeOperationState::InProgress => StepOutcome::retry(operation, config.status_poll_interval()),
            RuntimeOperationState::Failed => {
                let reason = status.message.unwrap_or_else(|| "no details".to_string());
                operations
                    .operation_failed(operation, "Runtime deprovisioning failed", &reason)
                    .await
            }
        }
    }
}
