//! Request parameter validation.

use async_trait::async_trait;

use process_engine::{Operation, OperationManager, Plan, Step, StepOutcome};

use crate::pipelines::StepDependencies;

/// Fails the operation on parameters no later step could work with.
pub struct ValidateParametersStep {
    operations: OperationManager,
}

impl ValidateParametersStep {
    pub fn new(deps: &StepDependencies) -> Self {
        Self {
            operations: deps.operations.clone(),
        }
    }

    fn check(operation: &Operation) -> Result<(), String> {
        let params = &operation.provisioning_parameters;
        match params.plan() {
            None => Err(format!("unknown plan {}", params.plan_id)),
            Some(Plan::OwnCluster) if params.kubeconfig.as_deref().map_or(true, str::is_empty) => {
                Err("own cluster plan requires a kubeconfig".to_string())
            }
            Some(_) if params.global_account_id.is_empty() || params.subaccount_id.is_empty() => {
                Err("global account and subaccount are required".to_string())
            }
            Some(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Step for ValidateParametersStep {
    fn name(&self) -> &str {
        "validate_parameters"
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        match Self::check(&operation) {
            Ok(()) => StepOutcome::Completed(operation),
            Err(reason) => {
                self.operations
                    .operation_failed(operation, "Invalid provisioning parameters", &reason)
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
    use process_engine::operation::{OperationType, AWS_PLAN_ID, OWN_CLUSTER_PLAN_ID};
    use process_engine::{MemoryStorage, OperationState, Operations};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_valid_parameters() {
        let storage = Arc::new(MemoryStorage::new());
        let step = ValidateParametersStep::new(&dependencies(storage.clone(), Arc::new(FakeProvisioner::default())));
        let op = stored_operation(&storage, OperationType::Provision, AWS_PLAN_ID).await;

        assert!(matches!(step.run(op).await, StepOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_unknown_plan_fails() {
        let storage = Arc::new(MemoryStorage::new());
        let step = ValidateParametersStep::new(&dependencies(storage.clone(), Arc::new(FakeProvisioner::default())));
        let op = stored_operation(&storage, OperationType::Provision, "not-a-plan").await;

        let outcome = step.run(op).await;

        assert!(matches!(outcome, StepOutcome::Failed { .. }));
        let stored = storage.get_operation_by_id("op-1").await.unwrap();
        assert_eq!(stored.state, OperationState::Failed);
        assert_eq!(stored.description, "Invalid provisioning parameters");
    }

    #[tokio::test]
    async fn test_own_cluster_requires_kubeconfig() {
        let storage = Arc::new(MemoryStorage::new());
        let step = ValidateParametersStep::new(&dependencies(storage.clone(), Arc::new(FakeProvisioner::default())));
        let op = stored_operation(&storage, OperationType::Provision, OWN_CLUSTER_PLAN_ID).await;

        assert!(matches!(step.run(op).await, StepOutcome::Failed { .. }));
    }
}
