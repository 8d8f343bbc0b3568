//! Runtime removal request.

use async_trait::async_trait;

use process_engine::{Operation, Step, StepOutcome};

use crate::pipelines::StepDependencies;
use crate::provisioner::ProvisionerError;

/// Asks the provisioner to remove the runtime, keyed by the broker
/// operation id so a repeated request starts no second removal.
pub struct RemoveRuntimeStep {
    deps: StepDependencies,
}

impl RemoveRuntimeStep {
    pub fn new(deps: &StepDependencies) -> Self {
        Self { deps: deps.clone() }
    }
}

#[async_trait]
impl Step for RemoveRuntimeStep {
    fn name(&self) -> &str {
        "remove_runtime"
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        if operation.instance_details.provisioner_operation_id.is_some() {
            return StepOutcome::Completed(operation);
        }
        let Some(runtime_id) = operation.instance_details.runtime_id.clone() else {
            tracing::info!("No runtime recorded for instance, nothing to remove");
            return StepOutcome::Completed(operation);
        };

        match self.deps.provisioner.deprovision_runtime(&operation.id, &runtime_id).await {
            Ok(provisioner_operation_id) => {
                tracing::info!(
                    runtime_id = %runtime_id,
                    provisioner_operation_id = %provisioner_operation_id,
                    "Runtime removal started"
                );
                let (operation, retry) = self
                    .deps
                    .operations
                    .update_operation(operation, |op| {
                        op.instance_details.provisioner_operation_id = Some(provisioner_operation_id);
                        op.description = "Runtime removal started".to_string();
                    })
                    .await;
                StepOutcome::retry(operation, retry)
            }
            Err(ProvisionerError::NotFound(_)) => {
                tracing::info!(runtime_id = %runtime_id, "Runtime already removed");
                StepOutcome::Completed(operation)
            }
            Err(e) => {
                self.deps
                    .provisioner_failure(operation, "Runtime removal request failed", &e)
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
    use process_engine::operation::{OperationType, AWS_PLAN_ID};
    use process_engine::{MemoryStorage, Operations};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_removes_runtime_once() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        let step = RemoveRuntimeStep::new(&dependencies(storage.clone(), provisioner.clone()));
        let mut op = stored_operation(&storage, OperationType::Deprovision, AWS_PLAN_ID).await;
        op.instance_details.runtime_id = Some(RUNTIME_ID.to_string());
        let op = storage.update_operation(op).await.unwrap();

        let op = step.run(op).await.into_operation();
        assert_eq!(op.instance_details.provisioner_operation_id.as_deref(), Some("deprovision-op-1"));
        step.run(op).await;

        assert_eq!(provisioner.deprovision_count(), 1);
    }

    #[tokio::test]
    async fn test_unsaved_answer_is_not_requested_twice() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        let step = RemoveRuntimeStep::new(&dependencies(storage.clone(), provisioner.clone()));
        let mut op = stored_operation(&storage, OperationType::Deprovision, AWS_PLAN_ID).await;
        op.instance_details.runtime_id = Some(RUNTIME_ID.to_string());
        let op = storage.update_operation(op).await.unwrap();

        storage.fail_next_updates(1);
        let op = step.run(op).await.into_operation();
        assert!(op.instance_details.provisioner_operation_id.is_none());

        let op = step.run(op).await.into_operation();
        assert_eq!(op.instance_details.provisioner_operation_id.as_deref(), Some("deprovision-op-1"));
        assert_eq!(provisioner.deprovision_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_runtime_is_done() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        let step = RemoveRuntimeStep::new(&dependencies(storage.clone(), provisioner.clone()));
        let op = stored_operation(&storage, OperationType::Deprovision, AWS_PLAN_ID).await;

        assert!(matches!(step.run(op).await, StepOutcome::Completed(_)));
        assert_eq!(provisioner.deprovision_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_runtime_is_done() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        provisioner.fail_deprovision(ProvisionerError::NotFound(RUNTIME_ID.to_string()));
        let step = RemoveRuntimeStep::new(&dependencies(storage.clone(), provisioner));
        let mut op = stored_operation(&storage, OperationType::Deprovision, AWS_PLAN_ID).await;
        op.instance_details.runtime_id = Some(RUNTIME_ID.to_string());

        let outcome = step.run(op).await;

        assert!(matches!(outcome, StepOutcome::Completed(_)));
        assert!(outcome.operation().instance_details.provisioner_operation_id.is_none());
    }
}
