//! Operation storage contract.
//!
//! Every backend implements [`Operations`]. Updates are optimistic: the
//! caller passes the version it read and the backend answers with
//! [`StorageError::Conflict`] when the stored version moved on.

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::operation::Operation;

/// Persistence of operations.
#[async_trait]
pub trait Operations: Send + Sync {
    /// Store a new operation.
    ///
    /// Fails with `Conflict` when the id exists, or when the operation is
    /// unfinished and the instance already has an unfinished operation.
    async fn insert_operation(&self, operation: Operation) -> Result<Operation, StorageError>;

    /// Load an operation by id.
    async fn get_operation_by_id(&self, id: &str) -> Result<Operation, StorageError>;

    /// Persist a modified operation.
    ///
    /// The stored version must equal `operation.version`; on success the
    /// returned copy has the version bumped and `updated_at` set to now.
    async fn update_operation(&self, operation: Operation) -> Result<Operation, StorageError>;

    /// Most recently created operation of an instance.
    async fn get_last_operation(&self, instance_id: &str) -> Result<Operation, StorageError>;
}
