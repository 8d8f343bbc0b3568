//! Final step of every pipeline.

use async_trait::async_trait;

use process_engine::{Operation, OperationManager, Step, StepOutcome};

use crate::pipelines::StepDependencies;

/// Marks the operation succeeded.
pub struct FinishStep {
    name: String,
    description: String,
    operations: OperationManager,
}

impl FinishStep {
    pub fn new(deps: &StepDependencies, name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            operations: deps.operations.clone(),
        }
    }
}

#[async_trait]
impl Step for FinishStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        self.operations
            .operation_succeeded(operation, &self.description)
            .await
    }
}
