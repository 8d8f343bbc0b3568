//! Step contract.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProcessError;
use crate::operation::{Operation, Plan};

/// Result of running a step.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The step is done; the engine marks it finished.
    Completed(Operation),

    /// Run the same step again after `after`.
    Retry { operation: Operation, after: Duration },

    /// Permanent failure. The operation is already `Failed` when produced
    /// through the operation manager.
    Failed {
        operation: Operation,
        error: ProcessError,
    },
}

impl StepOutcome {
    /// Retry request; a zero delay is treated as completion.
    pub fn retry(operation: Operation, after: Duration) -> Self {
        if after.is_zero() {
            Self::Completed(operation)
        } else {
            Self::Retry { operation, after }
        }
    }

    /// Operation carried by the outcome.
    pub fn operation(&self) -> &Operation {
        match self {
            Self::Completed(operation) => operation,
            Self::Retry { operation, .. } => operation,
            Self::Failed { operation, .. } => operation,
        }
    }

    /// Take the carried operation.
    pub fn into_operation(self) -> Operation {
        match self {
            Self::Completed(operation) => operation,
            Self::Retry { operation, .. } => operation,
            Self::Failed { operation, .. } => operation,
        }
    }

    /// Requested retry delay, zero unless this is a retry.
    pub fn retry_after(&self) -> Duration {
        match self {
            Self::Retry { after, .. } => *after,
            _ => Duration::ZERO,
        }
    }

    /// Error of a failed outcome.
    pub fn error(&self) -> Option<&ProcessError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// A named unit of work applied to an operation.
///
/// Steps may be re-run after a partial failure or a process restart, so any
/// external side effect must be idempotent or guarded by data the step
/// stores on the operation.
#[async_trait]
pub trait Step: Send + Sync {
    /// Unique, stable name used to track finished steps.
    fn name(&self) -> &str;

    /// Run the step against the current operation snapshot.
    async fn run(&self, operation: Operation) -> StepOutcome;
}

type Predicate = Box<dyn Fn(&Operation) -> bool + Send + Sync>;

/// Runs the inner step only when a predicate over the operation holds.
pub struct ConditionalStep {
    step: Arc<dyn Step>,
    predicate: Predicate,
}

impl ConditionalStep {
    /// Wrap `step`; it is skipped, and counts as completed, when `predicate`
    /// is false.
    pub fn new<F>(step: Arc<dyn Step>, predicate: F) -> Self
    where
        F: Fn(&Operation) -> bool + Send + Sync + 'static,
    {
        Self {
            step,
            predicate: Box::new(predicate),
        }
    }

    /// Skip the inner step for the given plans.
    pub fn skip_for_plans(plans: &[Plan], step: Arc<dyn Step>) -> Self {
        let plans: HashSet<Plan> = plans.iter().copied().collect();
        Self::new(step, move |op| {
            op.provisioning_parameters
                .plan()
                .map(|plan| !plans.contains(&plan))
                .unwrap_or(true)
        })
    }

    /// Run the inner step only for the given plans.
    pub fn only_for_plans(plans: &[Plan], step: Arc<dyn Step>) -> Self {
        let plans: HashSet<Plan> = plans.iter().copied().collect();
        Self::new(step, move |op| {
            op.provisioning_parameters
                .plan()
                .map(|plan| plans.contains(&plan))
                .unwrap_or(false)
        })
    }
}

#[async_trait]
impl Step for ConditionalStep {
    fn name(&self) -> &str {
        self.step.name()
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        if !(self.predicate)(&operation) {
            tracing::info!(step = %self.step.name(), "Skipping step");
            return StepOutcome::Completed(operation);
        }
        self.step.run(operation).await
    }
}
