//! Pipeline wiring for provisioning and deprovisioning.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use process_engine::{
    ConditionalStep, Operation, OperationManager, Pipeline, Plan, ProcessResult, StepOutcome,
};

use crate::config::AppConfig;
use crate::deprovisioning::{CheckRuntimeRemovalStep, RemoveRuntimeStep};
use crate::provisioner::{Labels, ProvisionerClient, ProvisionerError};
use crate::provisioning::{
    ApplyLabelsStep, CheckRuntimeStep, CreateRuntimeStep, FinishStep, ValidateParametersStep,
};

pub const PROVISIONING: &str = "provisioning";
pub const DEPROVISIONING: &str = "deprovisioning";

/// Collaborators shared by every broker step.
#[derive(Clone)]
pub struct StepDependencies {
    pub operations: OperationManager,
    pub provisioner: Arc<dyn ProvisionerClient>,
    pub config: Arc<AppConfig>,
}

impl StepDependencies {
    /// Retry temporary provisioner failures within the configured budget,
    /// fail the operation on anything else.
    pub async fn provisioner_failure(
        &self,
        operation: Operation,
        message: &str,
        error: &ProvisionerError,
    ) -> StepOutcome {
        if error.is_temporary() {
            self.operations
                .retry_operation(
                    operation,
                    message,
                    &error.to_string(),
                    self.config.provisioner_retry_interval(),
                    self.config.provisioner_retry_timeout(),
                )
                .await
        } else {
            self.operations
                .operation_failed(operation, message, &error.to_string())
                .await
        }
    }
}

/// Whether the operation has been running for longer than `timeout`.
pub fn timed_out(operation: &Operation, timeout: Duration) -> bool {
    (Utc::now() - operation.created_at)
        .to_std()
        .map(|elapsed| elapsed > timeout)
        .unwrap_or(false)
}

/// Labels identifying the broker instance on the runtime.
pub fn runtime_labels(operation: &Operation) -> Labels {
    let params = &operation.provisioning_parameters;
    let mut labels = Labels::new();
    labels.insert("broker_instance_id".to_string(), operation.instance_id.clone());
    labels.insert("global_account_id".to_string(), params.global_account_id.clone());
    labels.insert("subaccount_id".to_string(), params.subaccount_id.clone());
    if let Some(name) = &params.name {
        labels.insert("runtime_name".to_string(), name.clone());
    }
    labels
}

/// Stages: `create_runtime`, `post_actions`, `finish`.
pub fn provisioning_pipeline(deps: &StepDependencies) -> ProcessResult<Pipeline> {
    let own_cluster = [Plan::OwnCluster];
    let mut builder = Pipeline::builder();
    builder
        .add_step("create_runtime", 1, Arc::new(ValidateParametersStep::new(deps)))?
        .add_step(
            "create_runtime",
            2,
            Arc::new(ConditionalStep::skip_for_plans(&own_cluster, Arc::new(CreateRuntimeStep::new(deps)))),
        )?
        .add_step(
            "create_runtime",
            3,
            Arc::new(ConditionalStep::skip_for_plans(&own_cluster, Arc::new(CheckRuntimeStep::new(deps)))),
        )?
        .add_step(
            "post_actions",
            1,
            Arc::new(ConditionalStep::skip_for_plans(&own_cluster, Arc::new(ApplyLabelsStep::new(deps)))),
        )?
        .add_step(
            "finish",
            1,
            Arc::new(FinishStep::new(deps, "finish_provisioning", "Runtime provisioned")),
        )?;
    Ok(builder.build())
}

/// Stages: `remove_runtime`, `finish`.
pub fn deprovisioning_pipeline(deps: &StepDependencies) -> ProcessResult<Pipeline> {
    let own_cluster = [Plan::OwnCluster];
    let mut builder = Pipeline::builder();
    builder
        .add_step(
            "remove_runtime",
            1,
            Arc::new(ConditionalStep::skip_for_plans(&own_cluster, Arc::new(RemoveRuntimeStep::new(deps)))),
        )?
        .add_step(
            "remove_runtime",
            2,
            Arc::new(ConditionalStep::skip_for_plans(
                &own_cluster,
                Arc::new(CheckRuntimeRemovalStep::new(deps)),
            )),
        )?
        .add_step(
            "finish",
            1,
            Arc::new(FinishStep::new(deps, "finish_deprovisioning", "Runtime deprovisioned")),
        )?;
    Ok(builder.build())
}
