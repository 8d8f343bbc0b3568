//! Operation model.
//!
//! An [`Operation`] is the persisted record of one provisioning or
//! deprovisioning attempt. The engine only reads the progress markers
//! (`state`, `finished_stages`, `finished_steps`); everything else belongs to
//! the steps that write it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Created by the request layer, not yet picked up.
    Pending,
    /// Being driven through its stages.
    InProgress,
    /// All stages finished.
    Succeeded,
    /// A step failed the operation.
    Failed,
}

impl OperationState {
    /// `Succeeded` and `Failed` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<&str> for OperationState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "in progress" | "in_progress" => Self::InProgress,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Kind of work an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Provision,
    Deprovision,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provision => write!(f, "provision"),
            Self::Deprovision => write!(f, "deprovision"),
        }
    }
}

impl From<&str> for OperationType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "deprovision" => Self::Deprovision,
            _ => Self::Provision,
        }
    }
}

/// Service plans offered by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Azure,
    Aws,
    Gcp,
    OpenStack,
    Trial,
    OwnCluster,
}

pub const AZURE_PLAN_ID: &str = "4deee563-e5ec-4731-b9b1-53b42d855f0c";
pub const AWS_PLAN_ID: &str = "361c511f-f939-4621-b228-d0fb79a1fe15";
pub const GCP_PLAN_ID: &str = "ca6e5357-707f-4565-bbbd-b3ab732597c6";
pub const OPENSTACK_PLAN_ID: &str = "03b812ac-c991-4528-b5bd-08b303523a63";
pub const TRIAL_PLAN_ID: &str = "7d55d31d-35ae-4438-bf13-6ffdfa107d9f";
pub const OWN_CLUSTER_PLAN_ID: &str = "03e3cb66-a4c6-4c6a-b4b0-5d42224debea";

impl Plan {
    /// Resolve a plan from its catalog id.
    pub fn from_id(plan_id: &str) -> Option<Self> {
        match plan_id {
            AZURE_PLAN_ID => Some(Self::Azure),
            AWS_PLAN_ID => Some(Self::Aws),
            GCP_PLAN_ID => Some(Self::Gcp),
            OPENSTACK_PLAN_ID => Some(Self::OpenStack),
            TRIAL_PLAN_ID => Some(Self::Trial),
            OWN_CLUSTER_PLAN_ID => Some(Self::OwnCluster),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Azure => AZURE_PLAN_ID,
            Self::Aws => AWS_PLAN_ID,
            Self::Gcp => GCP_PLAN_ID,
            Self::OpenStack => OPENSTACK_PLAN_ID,
            Self::Trial => TRIAL_PLAN_ID,
            Self::OwnCluster => OWN_CLUSTER_PLAN_ID,
        }
    }

    /// Cloud provider backing the plan; `None` for bring-your-own cluster.
    pub fn provider(&self) -> Option<&'static str> {
        match self {
            Self::Azure | Self::Trial => Some("azure"),
            Self::Aws => Some("aws"),
            Self::Gcp => Some("gcp"),
            Self::OpenStack => Some("openstack"),
            Self::OwnCluster => None,
        }
    }
}

/// Request parameters captured when the operation was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningParameters {
    pub plan_id: String,
    pub service_id: String,
    #[serde(default)]
    pub global_account_id: String,
    #[serde(default)]
    pub subaccount_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Kubeconfig of a bring-your-own cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
}

impl ProvisioningParameters {
    pub fn plan(&self) -> Option<Plan> {
        Plan::from_id(&self.plan_id)
    }
}

/// Results accumulated by steps while the operation runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioner_operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    #[serde(default)]
    pub labels_applied: bool,
}

/// Persisted record of one provisioning or deprovisioning attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub instance_id: String,
    /// Optimistic-concurrency version, maintained by the storage.
    pub version: i64,
    pub operation_type: OperationType,
    pub state: OperationState,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_stages: Vec<String>,
    #[serde(default)]
    pub finished_steps: Vec<String>,
    #[serde(default)]
    pub provisioning_parameters: ProvisioningParameters,
    #[serde(default)]
    pub instance_details: InstanceDetails,
}

impl Operation {
    /// Create a new pending operation with a generated id.
    pub fn new(
        instance_id: &str,
        operation_type: OperationType,
        parameters: ProvisioningParameters,
    ) -> Self {
        Self::with_id(
            &uuid::Uuid::new_v4().to_string(),
            instance_id,
            operation_type,
            parameters,
        )
    }

    /// Create a new pending operation with the given id.
    pub fn with_id(
        id: &str,
        instance_id: &str,
        operation_type: OperationType,
        parameters: ProvisioningParameters,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            instance_id: instance_id.to_string(),
            version: 0,
            operation_type,
            state: OperationState::Pending,
            description: format!("Operation created ({})", operation_type),
            created_at: now,
            updated_at: now,
            finished_stages: Vec::new(),
            finished_steps: Vec::new(),
            provisioning_parameters: parameters,
            instance_details: InstanceDetails::default(),
        }
    }

    pub fn is_stage_finished(&self, stage: &str) -> bool {
        self.finished_stages.iter().any(|s| s == stage)
    }

    pub fn is_step_finished(&self, step: &str) -> bool {
        self.finished_steps.iter().any(|s| s == step)
    }

    /// Record a step as finished within the current stage.
    pub fn mark_step_finished(&mut self, step: &str) {
        if !self.is_step_finished(step) {
            self.finished_steps.push(step.to_string());
        }
    }

    /// Checkpoint a stage. Step markers only guard the stage they ran in.
    pub fn finish_stage(&mut self, stage: &str) {
        if !self.is_stage_finished(stage) {
            self.finished_stages.push(stage.to_string());
        }
        self.finished_steps.clear();
    }

    /// Time elapsed since the last successful persistence.
    pub fn time_since_update(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.updated_at)
    }
}
