//! Polling of the runtime creation.

use async_trait::async_trait;

use process_engine::{Operation, Step, StepOutcome};

use crate::pipelines::{timed_out, StepDependencies};
use crate::provisioner::RuntimeOperationState;

/// Waits until the provisioner reports the runtime as created.
pub struct CheckRuntimeStep {
    deps: StepDependencies,
}

impl CheckRuntimeStep {
    pub fn new(deps: &StepDependencies) -> Self {
        Self { deps: deps.clone() }
    }
}

#[async_trait]
impl Step for CheckRuntimeStep {
    fn name(&self) -> &str {
        "check_runtime"
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        let operations = &self.deps.operations;
        let config = &self.deps.config;

        let Some(provisioner_operation_id) = operation.instance_details.provisioner_operation_id.clone() else {
            return operations
                .operation_failed(operation, "Runtime creation was never requested", "missing provisioner operation id")
                .await;
        };

        if timed_out(&operation, config.provisioning_timeout()) {
            return operations
                .operation_failed(
                    operation,
                    "Runtime provisioning timed out",
                    &format!("no result after {}s", config.provisioning_timeout),
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
            Err(e) => {
                return self
                    .deps
                    .provisioner_failure(operation, "Cannot read runtime status", &e)
                    .await;
            }
        };

        match status.state {
            RuntimeOperationState::Succeeded => {
                tracing::info!(shoot_name = ?status.shoot_name, "Runtime ready");
                let (operation, retry) = operations
                    .update_operation(operation, |op| {
                        if status.runtime_id.is_some() {
                            op.instance_details.runtime_id = status.runtime_id;
                        }
                        op.instance_details.shoot_name = status.shoot_name;
                        op.instance_details.shoot_domain = status.shoot_domain;
                        op.description = "Runtime created".to_string();
                    })
                    .await;
                StepOutcome::retry(operation, retry)
            }
            RuntimeOperationState::InProgress => {
                tracing::debug!("Runtime still being created");
                StepOutcome::retry(operation, config.status_poll_interval())
            }
            RuntimeOperationState::Failed => {
                let reason = status.message.unwrap_or_else(|| "no details".to_string());
                operations
                    .operation_failed(operation, "Runtime provisioning failed", &reason)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::tests::{dependencies, stored_operation};
    use crate::provisioner::fake::FakeProvisioner;
    use process_engine::operation::{OperationType, GCP_PLAN_ID};
    use process_engine::{MemoryStorage, OperationState, Operations};
    use std::sync::Arc;
    use std::time::Duration;

    async fn requested(storage: &MemoryStorage) -> Operation {
        let mut op = stored_operation(storage, OperationType::Provision, GCP_PLAN_ID).await;
        op.instance_details.provisioner_operation_id = Some("provision-op-1".to_string());
        storage.update_operation(op).await.unwrap()
    }

    #[tokio::test]
    async fn test_polls_until_ready() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        provisioner.push_status(RuntimeOperationState::InProgress);
        let step = CheckRuntimeStep::new(&dependencies(storage.clone(), provisioner.clone()));
        let op = requested(&storage).await;

        let outcome = step.run(op).await;
        assert_eq!(outcome.retry_after(), Duration::from_secs(5));

        let outcome = step.run(outcome.into_operation()).await;
        assert!(matches!(outcome, StepOutcome::Completed(_)));
        let stored = storage.get_operation_by_id("op-1").await.unwrap();
        assert_eq!(stored.instance_details.shoot_name.as_deref(), Some("c-1a2b3c"));
        assert_eq!(*provisioner.status_calls.lock().unwrap(), vec!["provision-op-1", "provision-op-1"]);
    }

    #[tokio::test]
    async fn test_failed_runtime_fails_operation() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        provisioner.push_status(RuntimeOperationState::Failed);
        let step = CheckRuntimeStep::new(&dependencies(storage.clone(), provisioner));
        let op = requested(&storage).await;

        let outcome = step.run(op).await;

        assert!(matches!(outcome, StepOutcome::Failed { .. }));
        let stored = storage.get_operation_by_id("op-1").await.unwrap();
        assert_eq!(stored.state, OperationState::Failed);
        assert_eq!(stored.description, "Runtime provisioning failed");
    }

    #[tokio::test]
    async fn test_timeout_fails_without_polling() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        let step = CheckRuntimeStep::new(&dependencies(storage.clone(), provisioner.clone()));
        let mut op = requested(&storage).await;
        op.created_at = chrono::Utc::now() - chrono::Duration::hours(2);

        let outcome = step.run(op).await;

        assert!(matches!(outcome, StepOutcome::Failed { .. }));
        assert!(provisioner.status_calls.lock().unwrap().is_empty());
    }
}
