//! Staged operation processing.
//!
//! A [`Pipeline`] is an ordered list of named stages; every stage groups its
//! steps by integer weight. [`StagedManager::execute`] drives one operation
//! through the stages it has not finished yet:
//!
//! - stages run in registration order, weights in ascending order, steps of
//!   one weight in registration order
//! - finished stages and steps are skipped, so a resumed run never repeats
//!   completed work
//! - a retry request stops the run after the current weight and reports the
//!   smallest requested delay
//! - a failure or a terminal state stops the run immediately
//! - a stage is checkpointed with a single write once all its steps finished

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use crate::config::ProcessConfig;
use crate::error::{ProcessError, ProcessResult};
use crate::events::{EventPublisher, ProcessEvent, StepProcessed};
use crate::manager::OperationManager;
use crate::operation::{Operation, OperationState};
use crate::queue::Executor;
use crate::step::{Step, StepOutcome};
use crate::storage::Operations;

/// A named stage with its steps grouped by weight.
pub struct Stage {
    name: String,
    steps: BTreeMap<u32, Vec<Arc<dyn Step>>>,
}

impl Stage {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: BTreeMap::new(),
        }
    }

    /// Name recorded in `finished_stages` once the stage is done.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.values().flatten().map(|s| s.name()).collect()
    }

    fn is_complete(&self, operation: &Operation) -> bool {
        self.steps
            .values()
            .flatten()
            .all(|s| operation.is_step_finished(s.name()))
    }
}

/// Immutable stage/step registration table.
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Start registering stages and steps.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of steps across all stages.
    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|s| s.steps.values().map(Vec::len).sum::<usize>()).sum()
    }
}

/// Builds a [`Pipeline`] during process wiring.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
    step_names: HashSet<String>,
}

impl PipelineBuilder {
    /// Register a step in a stage at the given weight.
    ///
    /// The first registration of a stage name fixes the stage position.
    /// Step names must be unique across the whole pipeline.
    pub fn add_step(&mut self, stage: &str, weight: u32, step: Arc<dyn Step>) -> ProcessResult<&mut Self> {
        if stage.is_empty() {
            return Err(ProcessError::Registration("stage name must not be empty".to_string()));
        }
        if !self.step_names.insert(step.name().to_string()) {
            return Err(ProcessError::Registration(format!(
                "step {} is already registered",
                step.name()
            )));
        }

        let index = match self.stages.iter().position(|s| s.name == stage) {
            Some(index) => index,
            None => {
                self.stages.push(Stage::new(stage));
                self.stages.len() - 1
            }
        };
        self.stages[index].steps.entry(weight).or_default().push(step);
        Ok(self)
    }

    /// Freeze the registration table.
    pub fn build(self) -> Pipeline {
        Pipeline { stages: self.stages }
    }
}

/// Drives operations through a pipeline.
pub struct StagedManager {
    name: String,
    pipeline: Pipeline,
    manager: OperationManager,
    publisher: Arc<dyn EventPublisher>,
}

impl StagedManager {
    /// `name` labels the log spans of every run.
    pub fn new(
        name: &str,
        pipeline: Pipeline,
        storage: Arc<dyn Operations>,
        publisher: Arc<dyn EventPublisher>,
        config: ProcessConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            pipeline,
            manager: OperationManager::new(storage, config),
            publisher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Manager over the same storage, for wiring steps.
    pub fn operation_manager(&self) -> &OperationManager {
        &self.manager
    }

    /// Process one operation.
    ///
    /// Returns `Ok(delay)` with a non-zero delay when the operation must be
    /// processed again later, `Ok(ZERO)` when there is nothing left to do,
    /// and `Err` when a step failed.
    pub async fn execute(&self, operation_id: &str) -> ProcessResult<Duration> {
        let operation = match self.manager.storage().get_operation_by_id(operation_id).await {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(
                    process = %self.name,
                    operation_id = %operation_id,
                    error = %e,
                    "Cannot load operation, retrying"
                );
                return Ok(self.manager.config().storage_retry_interval());
            }
        };

        let span = tracing::info_span!(
            "process_operation",
            process = %self.name,
            operation_id = %operation.id,
            instance_id = %operation.instance_id,
        );
        self.process(operation).instrument(span).await
    }

    async fn process(&self, mut operation: Operation) -> ProcessResult<Duration> {
        if operation.state.is_terminal() {
            tracing::debug!(state = %operation.state, "Operation already finished");
            return Ok(Duration::ZERO);
        }

        if operation.state == OperationState::Pending {
            let (op, retry) = self
                .manager
                .update_operation(operation, |op| {
                    op.state = OperationState::InProgress;
                    op.description = "Operation in progress".to_string();
                })
                .await;
            if !retry.is_zero() {
                return Ok(retry);
            }
            operation = op;
        }

        for stage in &self.pipeline.stages {
            if operation.is_stage_finished(&stage.name) {
                continue;
            }
            tracing::debug!(stage = %stage.name, "Processing stage");

            for (weight, steps) in &stage.steps {
                let mut bucket_retry: Option<Duration> = None;

                for step in steps {
                    if operation.is_step_finished(step.name()) {
                        continue;
                    }

                    let before = operation.state;
                    let outcome = self.run_step(&stage.name, step.as_ref(), operation.clone()).await;
                    let retry_after = outcome.retry_after();
                    let completed = matches!(outcome, StepOutcome::Completed(_));

                    operation = match outcome {
                        StepOutcome::Failed { operation, error } => {
                            return Err(self.failure(step.name(), &operation, error));
                        }
                        other => other.into_operation(),
                    };

                    if !before.can_transition_to(operation.state) {
                        return Err(self.backward_state(step.name(), before, operation.state));
                    }

                    if operation.state != OperationState::InProgress {
                        tracing::info!(
                            stage = %stage.name,
                            step = %step.name(),
                            state = %operation.state,
                            "Step finished the operation"
                        );
                        if completed {
                            return Ok(self.checkpoint_terminal(stage, step.name(), operation).await);
                        }
                        return Ok(Duration::ZERO);
                    }

                    if !retry_after.is_zero() {
                        tracing::debug!(
                            stage = %stage.name,
                            step = %step.name(),
                            weight = *weight,
                            retry_after_secs = retry_after.as_secs(),
                            "Step requested retry"
                        );
                        bucket_retry = Some(bucket_retry.map_or(retry_after, |d| d.min(retry_after)));
                        continue;
                    }

                    let name = step.name();
                    let (op, retry) = self
                        .manager
                        .update_operation(operation, |op| op.mark_step_finished(name))
                        .await;
                    if !retry.is_zero() {
                        return Ok(retry);
                    }
                    operation = op;
                }

                if let Some(delay) = bucket_retry {
                    return Ok(delay);
                }
            }

            let (op, retry) = self
                .manager
                .update_operation(operation, |op| op.finish_stage(&stage.name))
                .await;
            if !retry.is_zero() {
                tracing::warn!(stage = %stage.name, "Stage checkpoint not saved");
                return Ok(retry);
            }
            operation = op;
            tracing::info!(stage = %stage.name, "Stage finished");
        }

        if operation.state == OperationState::InProgress {
            let (_, retry) = self
                .manager
                .update_operation(operation, |op| {
                    op.state = OperationState::Succeeded;
                    op.description = "Operation succeeded".to_string();
                })
                .await;
            if !retry.is_zero() {
                return Ok(retry);
            }
            tracing::info!("All stages finished");
        }

        Ok(Duration::ZERO)
    }

    async fn run_step(&self, stage: &str, step: &dyn Step, operation: Operation) -> StepOutcome {
        let span = tracing::info_span!("step", stage = %stage, step = %step.name());
        let old_operation = operation.clone();
        let started = Instant::now();

        let outcome = step.run(operation).instrument(span).await;

        self.publisher.publish(ProcessEvent::StepProcessed(StepProcessed {
            step_name: step.name().to_string(),
            stage: stage.to_string(),
            old_operation,
            operation: outcome.operation().clone(),
            duration: started.elapsed(),
            retry_after: outcome.retry_after(),
            error: outcome.error().map(|e| e.to_string()),
        }));

        outcome
    }

    fn failure(&self, step: &str, operation: &Operation, error: ProcessError) -> ProcessError {
        if operation.state == OperationState::Failed {
            return error;
        }
        tracing::error!(
            step = %step,
            state = %operation.state,
            error = %error,
            "Step returned an error without failing the operation"
        );
        ProcessError::StepBug {
            step: step.to_string(),
            reason: error.to_string(),
        }
    }

    /// A step moved the state backwards; nothing of it is saved.
    fn backward_state(&self, step: &str, from: OperationState, to: OperationState) -> ProcessError {
        tracing::error!(step = %step, from = %from, to = %to, "Step moved the operation state backwards");
        ProcessError::StepBug {
            step: step.to_string(),
            reason: format!("state moved from {} to {}", from, to),
        }
    }

    /// Record the step that ended the operation, and its stage when nothing
    /// else in it is left. Returns the delay before the next attempt when
    /// the write failed.
    async fn checkpoint_terminal(&self, stage: &Stage, step: &str, operation: Operation) -> Duration {
        let (_, retry) = self
            .manager
            .update_operation(operation, |op| {
                op.mark_step_finished(step);
                if stage.is_complete(op) {
                    op.finish_stage(&stage.name);
                }
            })
            .await;
        if !retry.is_zero() {
            tracing::warn!(stage = %stage.name, step = %step, "Progress of finished operation not saved");
        }
        retry
    }
}

#[async_trait]
impl Executor for StagedManager {
    async fn execute(&self, operation_id: &str) -> ProcessResult<Duration> {
        StagedManager::execute(self, operation_id).await
    }
}
