//! Process Engine
//!
//! Staged, resumable processing of long-running operations.
//!
//! This crate provides:
//! - Operation model and the storage contract with an in-memory backend
//! - Step contract and the operation manager used by steps
//! - Staged manager running weighted steps with stage checkpoints
//! - Step event publishing
//! - Work queue feeding operation ids to the staged manager

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod operation;
pub mod queue;
pub mod staged;
pub mod step;
pub mod storage;

pub use config::{ProcessConfig, QueueConfig};
pub use error::{ProcessError, ProcessResult, StorageError};
pub use events::{EventPublisher, ProcessEvent, StepProcessed};
pub use manager::OperationManager;
pub use operation::{Operation, OperationState, OperationType, Plan};
pub use queue::{Executor, Queue};
pub use staged::{Pipeline, PipelineBuilder, StagedManager};
pub use step::{ConditionalStep, Step, StepOutcome};
pub use storage::{MemoryStorage, Operations};
