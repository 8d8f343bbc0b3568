//! In-memory operation storage.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::Operations;
use crate::error::StorageError;
use crate::operation::Operation;

/// Operation storage kept in process memory.
///
/// Not durable. Used by tests and by the broker when no database is
/// configured.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    operations: RwLock<HashMap<String, Operation>>,
    failing_updates: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` updates fail with a backend error.
    pub fn fail_next_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Number of stored operations.
    pub async fn len(&self) -> usize {
        self.operations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.operations.read().await.is_empty()
    }
}

#[async_trait]
impl Operations for MemoryStorage {
    async fn insert_operation(&self, operation: Operation) -> Result<Operation, StorageError> {
        let mut operations = self.operations.write().await;
        if operations.contains_key(&operation.id) {
            return Err(StorageError::Conflict(format!(
                "operation {} already exists",
                operation.id
            )));
        }
        if !operation.state.is_terminal() {
            if let Some(running) = operations
                .values()
                .find(|op| op.instance_id == operation.instance_id && !op.state.is_terminal())
            {
                return Err(StorageError::Conflict(format!(
                    "instance {} already has unfinished operation {}",
                    operation.instance_id, running.id
                )));
            }
        }
        operations.insert(operation.id.clone(), operation.clone());
        Ok(operation)
    }

    async fn get_operation_by_id(&self, id: &str) -> Result<Operation, StorageError> {
        self.operations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn update_operation(&self, operation: Operation) -> Result<Operation, StorageError> {
        if self.take_failure() {
            return Err(StorageError::Backend(format!(
                "injected failure updating {}",
                operation.id
            )));
        }

        let mut operations = self.operations.write().await;
        let stored = operations
            .get(&operation.id)
            .ok_or_else(|| StorageError::NotFound(operation.id.clone()))?;

        if stored.version != operation.version {
            return Err(StorageError::Conflict(format!(
                "operation {} has version {}, update based on version {}",
                operation.id, stored.version, operation.version
            )));
        }

        let mut updated = operation;
        updated.version += 1;
        updated.updated_at = Utc::now();
        operations.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn get_last_operation(&self, instance_id: &str) -> Result<Operation, StorageError> {
        self.operations
            .read()
            .await
            .values()
            .filter(|op| op.instance_id == instance_id)
            .max_by_key(|op| op.created_at)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("instance {}", instance_id)))
    }
}
