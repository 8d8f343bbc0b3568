//! Scriptable in-process provisioner for tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{
    Labels, ProvisionRuntimeInput, ProvisionerClient, ProvisionerError, ProvisionerOperation,
    RuntimeOperationState, RuntimeOperationStatus,
};

pub(crate) const RUNTIME_ID: &str = "runtime-1";

/// Records every call; answers from per-call scripts, succeeding once a
/// script is empty. A repeated request id gets the first answer back without
/// being recorded again.
#[derive(Default)]
pub(crate) struct FakeProvisioner {
    pub provisioned: Mutex<Vec<ProvisionRuntimeInput>>,
    pub deprovisioned: Mutex<Vec<String>>,
    pub labeled: Mutex<Vec<(String, Labels)>>,
    pub status_calls: Mutex<Vec<String>>,
    provision_requests: Mutex<HashMap<String, ProvisionerOperation>>,
    deprovision_requests: Mutex<HashMap<String, String>>,
    statuses: Mutex<VecDeque<RuntimeOperationState>>,
    provision_errors: Mutex<VecDeque<ProvisionerError>>,
    deprovision_errors: Mutex<VecDeque<ProvisionerError>>,
    label_errors: Mutex<VecDeque<ProvisionerError>>,
}

impl FakeProvisioner {
    pub fn push_status(&self, state: RuntimeOperationState) {
        self.statuses.lock().unwrap().push_back(state);
    }

    pub fn fail_provision(&self, error: ProvisionerError) {
        self.provision_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_deprovision(&self, error: ProvisionerError) {
        self.deprovision_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_labels(&self, error: ProvisionerError) {
        self.label_errors.lock().unwrap().push_back(error);
    }

    pub fn provision_count(&self) -> usize {
        self.provisioned.lock().unwrap().len()
    }

    pub fn deprovision_count(&self) -> usize {
        self.deprovisioned.lock().unwrap().len()
    }

    pub fn label_count(&self) -> usize {
        self.labeled.lock().unwrap().len()
    }
}

#[async_trait]
impl ProvisionerClient for FakeProvisioner {
    async fn provision_runtime(
        &self,
        request_id: &str,
        input: &ProvisionRuntimeInput,
    ) -> Result<ProvisionerOperation, ProvisionerError> {
        if let Some(error) = self.provision_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut requests = self.provision_requests.lock().unwrap();
        if let Some(accepted) = requests.get(request_id) {
            return Ok(accepted.clone());
        }
        let mut provisioned = self.provisioned.lock().unwrap();
        provisioned.push(input.clone());
        let accepted = ProvisionerOperation {
            operation_id: format!("provision-op-{}", provisioned.len()),
            runtime_id: RUNTIME_ID.to_string(),
        };
        requests.insert(request_id.to_string(), accepted.clone());
        Ok(accepted)
    }

    async fn deprovision_runtime(
        &self,
        request_id: &str,
        runtime_id: &str,
    ) -> Result<String, ProvisionerError> {
        if let Some(error) = self.deprovision_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut requests = self.deprovision_requests.lock().unwrap();
        if let Some(operation_id) = requests.get(request_id) {
            return Ok(operation_id.clone());
        }
        let mut deprovisioned = self.deprovisioned.lock().unwrap();
        deprovisioned.push(runtime_id.to_string());
        let operation_id = format!("deprovision-op-{}", deprovisioned.len());
        requests.insert(request_id.to_string(), operation_id.clone());
        Ok(operation_id)
    }

    async fn runtime_operation_status(
        &self,
        operation_id: &str,
    ) -> Result<RuntimeOperationStatus, ProvisionerError> {
        self.status_calls.lock().unwrap().push(operation_id.to_string());
        let state = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RuntimeOperationState::Succeeded);
        Ok(RuntimeOperationStatus {
            operation_id: operation_id.to_string(),
            state,
            message: match state {
                RuntimeOperationState::Failed => Some("quota exceeded".to_string()),
                _ => None,
            },
            runtime_id: Some(RUNTIME_ID.to_string()),
            shoot_name: Some("c-1a2b3c".to_string()),
            shoot_domain: Some("c-1a2b3c.runtimes.example.com".to_string()),
        })
    }

    async fn upgrade_runtime_labels(
        &self,
        runtime_id: &str,
        labels: &Labels,
    ) -> Result<(), ProvisionerError> {
        if let Some(error) = self.label_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.labeled
            .lock()
            .unwrap()
            .push((runtime_id.to_string(), labels.clone()));
        Ok(())
    }
}
