//! Shared application state.

use std::sync::Arc;

use process_engine::{
    EventPublisher, OperationManager, OperationType, Operations, ProcessConfig, ProcessResult, Queue,
    StagedManager,
};

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::pipelines::{
    deprovisioning_pipeline, provisioning_pipeline, StepDependencies, DEPROVISIONING, PROVISIONING,
};
use crate::provisioner::ProvisionerClient;

/// State handed to every handler.
///
/// Holds the operation storage and one work queue per operation type.
/// The queues are not running until [`Queue::run`] is called on them.
#[derive(Clone)]
pub struct AppState {
    pub operations: Arc<dyn Operations>,
    pub provisioning: Queue,
    pub deprovisioning: Queue,
    /// Set when operations live in Postgres.
    pub db: Option<DbPool>,
    pub config: Arc<AppConfig>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire the pipelines, staged managers and queues.
    pub fn new(
        operations: Arc<dyn Operations>,
        provisioner: Arc<dyn ProvisionerClient>,
        publisher: Arc<dyn EventPublisher>,
        db: Option<DbPool>,
        config: AppConfig,
        process: ProcessConfig,
    ) -> ProcessResult<Self> {
        let config = Arc::new(config);
        let deps = StepDependencies {
            operations: OperationManager::new(operations.clone(), process.clone()),
            provisioner,
            config: config.clone(),
        };

        let provisioning = StagedManager::new(
            PROVISIONING,
            provisioning_pipeline(&deps)?,
            operations.clone(),
            publisher.clone(),
            process.clone(),
        );
        let deprovisioning = StagedManager::new(
            DEPROVISIONING,
            deprovisioning_pipeline(&deps)?,
            operations.clone(),
            publisher,
            process,
        );

        Ok(Self {
            provisioning: Queue::new(Arc::new(provisioning), config.queue_config(PROVISIONING)),
            deprovisioning: Queue::new(Arc::new(deprovisioning), config.queue_config(DEPROVISIONING)),
            operations,
            db,
            config,
            start_time: std::time::Instant::now(),
        })
    }

    /// Hand an operation to the queue of its type.
    pub fn enqueue(&self, operation_id: &str, operation_type: OperationType) {
        match operation_type {
            OperationType::Provision => self.provisioning.add(operation_id),
            OperationType::Deprovision => self.deprovisioning.add(operation_id),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
