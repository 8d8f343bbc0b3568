//! Runtime labelling.

use async_trait::async_trait;

use process_engine::{Operation, Step, StepOutcome};

use crate::pipelines::{runtime_labels, StepDependencies};

/// Attaches the broker labels to the created runtime.
pub struct ApplyLabelsStep {
    deps: StepDependencies,
}

impl ApplyLabelsStep {
    pub fn new(deps: &StepDependencies) -> Self {
        Self { deps: deps.clone() }
    }
}

#[async_trait]
impl Step for ApplyLabelsStep {
    fn name(&self) -> &str {
        "apply_labels"
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        if operation.instance_details.labels_applied {
            return StepOutcome::Completed(operation);
        }

        let Some(runtime_id) = operation.instance_details.runtime_id.clone() else {
            return self
                .deps
                .operations
                .operation_failed(operation, "Cannot label runtime", "runtime id is missing")
                .await;
        };

        let labels = runtime_labels(&operation);
        if let Err(e) = self
            .deps
            .provisioner
            .upgrade_runtime_labels(&runtime_id, &labels)
            .await
        {
            return self
                .deps
                .provisioner_failure(operation, "Cannot label runtime", &e)
                .await;
        }

        tracing::info!(runtime_id = %runtime_id, labels = labels.len(), "Runtime labels applied");
        let (operation, retry) = self
            .deps
            .operations
            .update_operation(operation, |op| op.instance_details.labels_applied = true)
            .await;
        StepOutcome::retry(operation, retry)
    }
}
