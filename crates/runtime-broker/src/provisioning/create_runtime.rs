//! Runtime creation request.

use async_trait::async_trait;

use process_engine::{Operation, Step, StepOutcome};

use crate::pipelines::{runtime_labels, StepDependencies};
use crate::provisioner::ProvisionRuntimeInput;

/// Asks the provisioner for a new runtime.
///
/// The provisioner operation id is stored on the operation; once it is set
/// the request is never sent again. The request id is the broker operation
/// id, so a request whose answer was not saved is answered the same way
/// when it is sent again.
pub struct CreateRuntimeStep {
    deps: StepDependencies,
}

impl CreateRuntimeStep {
    pub fn new(deps: &StepDependencies) -> Self {
        Self { deps: deps.clone() }
    }

    fn input(operation: &Operation) -> ProvisionRuntimeInput {
        let params = &operation.provisioning_parameters;
        let runtime_name = params.name.clone().unwrap_or_else(|| {
            let short: String = operation.instance_id.chars().take(8).collect();
            format!("runtime-{}", short)
        });

        ProvisionRuntimeInput {
            runtime_name,
            global_account_id: params.global_account_id.clone(),
            subaccount_id: params.subaccount_id.clone(),
            provider: params
                .plan()
                .and_then(|plan| plan.provider())
                .unwrap_or_default()
                .to_string(),
            region: params.region.clone(),
            plan_id: params.plan_id.clone(),
            labels: runtime_labels(operation),
        }
    }
}

#[async_trait]
impl Step for CreateRuntimeStep {
    fn name(&self) -> &str {
        "create_runtime"
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        if operation.instance_details.provisioner_operation_id.is_some() {
            tracing::debug!("Runtime creation already requested");
            return StepOutcome::Completed(operation);
        }

        let input = Self::input(&operation);
        match self.deps.provisioner.provision_runtime(&operation.id, &input).await {
            Ok(accepted) => {
                tracing::info!(
                    runtime_id = %accepted.runtime_id,
                    provisioner_operation_id = %accepted.operation_id,
                    "Runtime creation started"
                );
                let (operation, retry) = self
                    .deps
                    .operations
                    .update_operation(operation, |op| {
                        op.instance_details.runtime_id = Some(accepted.runtime_id);
                        op.instance_details.provisioner_operation_id = Some(accepted.operation_id);
                        op.description = "Runtime creation started".to_string();
                    })
                    .await;
                StepOutcome::retry(operation, retry)
            }
            Err(e) => {
                self.deps
                    .provisioner_failure(operation, "Runtime creation request failed", &e)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::tests::{dependencies, stored_operation};
    use crate::provisioner::fake::{FakeProvisioner, RUNTIME_ID};
    use crate::provisioner::ProvisionerError;
    use process_engine::operation::{OperationType, AWS_PLAN_ID};
    use process_engine::{MemoryStorage, OperationState, Operations, ProcessConfig};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_creates_runtime_once() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        let step = CreateRuntimeStep::new(&dependencies(storage.clone(), provisioner.clone()));
        let op = stored_operation(&storage, OperationType::Provision, AWS_PLAN_ID).await;

        let outcome = step.run(op).await;
        let op = outcome.into_operation();
        assert_eq!(op.instance_details.runtime_id.as_deref(), Some(RUNTIME_ID));
        assert_eq!(op.instance_details.provisioner_operation_id.as_deref(), Some("provision-op-1"));

        let outcome = step.run(op).await;
        assert!(matches!(outcome, StepOutcome::Completed(_)));
        assert_eq!(provisioner.provision_count(), 1);

        let input = provisioner.provisioned.lock().unwrap()[0].clone();
        assert_eq!(input.provider, "aws");
        assert_eq!(input.runtime_name, "my-runtime");
        assert_eq!(input.region.as_deref(), Some("eu-west-1"));
    }

    #[tokio::test]
    async fn test_unsaved_answer_is_not_requested_twice() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        let step = CreateRuntimeStep::new(&dependencies(storage.clone(), provisioner.clone()));
        let op = stored_operation(&storage, OperationType::Provision, AWS_PLAN_ID).await;

        storage.fail_next_updates(1);
        let outcome = step.run(op).await;
        assert_eq!(outcome.retry_after(), ProcessConfig::default().storage_retry_interval());
        let op = outcome.into_operation();
        assert!(op.instance_details.provisioner_operation_id.is_none());

        let op = step.run(op).await.into_operation();
        assert_eq!(op.instance_details.provisioner_operation_id.as_deref(), Some("provision-op-1"));
        assert_eq!(provisioner.provision_count(), 1);

        let stored = storage.get_operation_by_id("op-1").await.unwrap();
        assert_eq!(stored.instance_details.provisioner_operation_id.as_deref(), Some("provision-op-1"));
    }

    #[tokio::test]
    async fn test_temporary_error_retries() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        provisioner.fail_provision(ProvisionerError::Status {
            status: 503,
            body: "unavailable".to_string(),
        });
        let step = CreateRuntimeStep::new(&dependencies(storage.clone(), provisioner.clone()));
        let op = stored_operation(&storage, OperationType::Provision, AWS_PLAN_ID).await;

        let outcome = step.run(op).await;

        assert_eq!(outcome.retry_after(), Duration::from_secs(2));
        assert_eq!(outcome.operation().state, OperationState::InProgress);
    }

    #[tokio::test]
    async fn test_rejected_request_fails() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        provisioner.fail_provision(ProvisionerError::Status {
            status: 400,
            body: "invalid region".to_string(),
        });
        let step = CreateRuntimeStep::new(&dependencies(storage.clone(), provisioner.clone()));
        let op = stored_operation(&storage, OperationType::Provision, AWS_PLAN_ID).await;

        let outcome = step.run(op).await;

        assert!(matches!(outcome, StepOutcome::Failed { .. }));
        let stored = storage.get_operation_by_id("op-1").await.unwrap();
        assert_eq!(stored.state, OperationState::Failed);
    }
}
