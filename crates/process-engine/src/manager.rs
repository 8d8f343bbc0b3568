//! Operation manager.
//!
//! Wraps the storage with the three canonical step outcomes: persist a
//! mutation, retry within a wall-clock budget, and fail permanently. Steps use
//! it instead of talking to the storage directly.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ProcessConfig;
use crate::error::{ProcessError, StorageError};
use crate::operation::{Operation, OperationState};
use crate::step::StepOutcome;
use crate::storage::Operations;

/// Storage-backed helper for step outcomes.
#[derive(Clone)]
pub struct OperationManager {
    storage: Arc<dyn Operations>,
    config: ProcessConfig,
}

impl OperationManager {
    pub fn new(storage: Arc<dyn Operations>, config: ProcessConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &Arc<dyn Operations> {
        &self.storage
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Apply `mutate` and persist the result.
    ///
    /// Returns the stored operation and a zero delay on success. Storage
    /// failures never fail the operation: a conflict yields the freshly
    /// loaded record with the conflict retry interval, any other error
    /// yields the unchanged input with the storage retry interval.
    pub async fn update_operation<F>(&self, operation: Operation, mutate: F) -> (Operation, Duration)
    where
        F: FnOnce(&mut Operation),
    {
        let mut updated = operation.clone();
        mutate(&mut updated);

        if !operation.state.can_transition_to(updated.state) {
            tracing::warn!(
                operation_id = %operation.id,
                from = %operation.state,
                to = %updated.state,
                "Rejecting backward state transition"
            );
            updated.state = operation.state;
        }

        match self.storage.update_operation(updated).await {
            Ok(stored) => (stored, Duration::ZERO),
            Err(StorageError::Conflict(reason)) => {
                tracing::warn!(
                    operation_id = %operation.id,
                    reason = %reason,
                    "Operation update conflict, reloading"
                );
                match self.storage.get_operation_by_id(&operation.id).await {
                    Ok(current) => (current, self.config.conflict_retry_interval()),
                    Err(e) => {
                        tracing::error!(operation_id = %operation.id, error = %e, "Failed to reload operation");
                        (operation, self.config.conflict_retry_interval())
                    }
                }
            }
            Err(e) => {
                tracing::error!(operation_id = %operation.id, error = %e, "Failed to update operation");
                (operation, self.config.storage_retry_interval())
            }
        }
    }

    /// Ask for a retry of the current step.
    ///
    /// Retries are bounded by wall-clock time since the operation last made
    /// progress: once `updated_at` is older than `max_time` the operation is
    /// failed instead.
    pub async fn retry_operation(
        &self,
        operation: Operation,
        message: &str,
        reason: &str,
        retry_interval: Duration,
        max_time: Duration,
    ) -> StepOutcome {
        let elapsed = operation.time_since_update().to_std().unwrap_or(Duration::ZERO);
        if elapsed > max_time {
            tracing::error!(
                operation_id = %operation.id,
                elapsed_seconds = elapsed.as_secs(),
                max_seconds = max_time.as_secs(),
                reason = %reason,
                "Retry budget exhausted"
            );
            return self.operation_failed(operation, message, reason).await;
        }

        tracing::warn!(
            operation_id = %operation.id,
            retry_in_seconds = retry_interval.as_secs(),
            reason = %reason,
            "{}, retrying", message
        );
        StepOutcome::retry(operation, retry_interval)
    }

    /// Mark the operation failed with a human readable description.
    ///
    /// When the failed state cannot be saved the outcome is a retry with the
    /// stored operation, so the step runs again and fails it again.
    pub async fn operation_failed(&self, operation: Operation, description: &str, reason: &str) -> StepOutcome {
        tracing::error!(
            operation_id = %operation.id,
            description = %description,
            reason = %reason,
            "Operation failed"
        );
        let error = ProcessError::OperationFailed {
            description: description.to_string(),
            reason: reason.to_string(),
        };
        match self
            .finish_operation(operation, OperationState::Failed, description)
            .await
        {
            Ok(operation) => StepOutcome::Failed { operation, error },
            Err((operation, retry)) => StepOutcome::retry(operation, retry),
        }
    }

    /// Mark the operation succeeded. The engine stops after the step that
    /// returns this outcome; an unsaved state turns into a retry.
    pub async fn operation_succeeded(&self, operation: Operation, description: &str) -> StepOutcome {
        tracing::info!(operation_id = %operation.id, description = %description, "Operation succeeded");
        match self
            .finish_operation(operation, OperationState::Succeeded, description)
            .await
        {
            Ok(operation) => StepOutcome::Completed(operation),
            Err((operation, retry)) => StepOutcome::retry(operation, retry),
        }
    }

    /// Move the operation to a terminal state.
    ///
    /// A conflicting write is re-applied once on the reloaded record. When
    /// the state still cannot be saved, returns the stored operation with the
    /// delay to wait before the next attempt.
    async fn finish_operation(
        &self,
        operation: Operation,
        state: OperationState,
        description: &str,
    ) -> Result<Operation, (Operation, Duration)> {
        let apply = |op: &mut Operation| {
            op.state = state;
            op.description = description.to_string();
        };

        let version = operation.version;
        let (stored, retry) = self.update_operation(operation, apply).await;
        if retry.is_zero() {
            return Ok(stored);
        }

        let (stored, retry) = if stored.version != version {
            let (stored, second) = self.update_operation(stored, apply).await;
            if second.is_zero() {
                return Ok(stored);
            }
            (stored, second)
        } else {
            (stored, retry)
        };

        tracing::warn!(
            operation_id = %stored.id,
            state = %state,
            retry_in_seconds = retry.as_secs(),
            "Terminal state not saved, retrying"
        );
        Err((stored, retry))
    }
}
