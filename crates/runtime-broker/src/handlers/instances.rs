//! Service instance endpoints.
//!
//! Requests only create operations and queue them; the pipelines do the
//! actual work. Status is read back from the last operation of the instance.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use process_engine::operation::ProvisioningParameters;
use process_engine::{Operation, OperationState, OperationType, StorageError};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Body of `PUT /v2/service_instances/{instance_id}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisionRequest {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub global_account_id: String,
    #[serde(default)]
    pub subaccount_id: String,
    #[serde(default)]
    pub parameters: ProvisionRequestParameters,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvisionRequestParameters {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

impl ProvisionRequest {
    fn into_parameters(self) -> ProvisioningParameters {
        ProvisioningParameters {
            plan_id: self.plan_id,
            service_id: self.service_id,
            global_account_id: self.global_account_id,
            subaccount_id: self.subaccount_id,
            region: self.parameters.region,
            name: self.parameters.name,
            kubeconfig: self.parameters.kubeconfig,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OperationResponse {
    pub operation: String,
}

#[derive(Debug, Deserialize)]
pub struct LastOperationQuery {
    pub operation: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LastOperationResponse {
    /// `in progress`, `succeeded` or `failed`.
    pub state: String,
    pub description: String,
    pub operation: String,
    pub operation_type: OperationType,
    pub updated_at: DateTime<Utc>,
}

impl From<Operation> for LastOperationResponse {
    fn from(op: Operation) -> Self {
        let state = match op.state {
            OperationState::Pending | OperationState::InProgress => "in progress",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        };
        Self {
            state: state.to_string(),
            description: op.description,
            operation: op.id,
            operation_type: op.operation_type,
            updated_at: op.updated_at,
        }
    }
}

type Accepted = (StatusCode, Json<OperationResponse>);

fn respond(status: StatusCode, operation_id: String) -> Accepted {
    (status, Json(OperationResponse { operation: operation_id }))
}

async fn last_operation_of(state: &AppState, instance_id: &str) -> AppResult<Option<Operation>> {
    match state.operations.get_last_operation(instance_id).await {
        Ok(op) => Ok(Some(op)),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn start(state: &AppState, operation: Operation) -> Result<Accepted, StorageError> {
    let operation = state.operations.insert_operation(operation).await?;
    tracing::info!(
        operation_id = %operation.id,
        instance_id = %operation.instance_id,
        operation_type = %operation.operation_type,
        "Operation accepted"
    );
    state.enqueue(&operation.id, operation.operation_type);
    Ok(respond(StatusCode::ACCEPTED, operation.id))
}

/// Answer a request from the operation the instance already has, if that
/// operation settles it.
fn existing_answer(
    requested: OperationType,
    instance_id: &str,
    last: &Operation,
) -> Option<AppResult<Accepted>> {
    if last.operation_type == requested {
        return match last.state {
            OperationState::Succeeded => Some(Ok(respond(StatusCode::OK, last.id.clone()))),
            OperationState::Pending | OperationState::InProgress => {
                Some(Ok(respond(StatusCode::ACCEPTED, last.id.clone())))
            }
            OperationState::Failed => None,
        };
    }
    if !last.state.is_terminal() {
        return Some(Err(AppError::Conflict(format!(
            "instance {} has a {} operation in progress",
            instance_id, last.operation_type
        ))));
    }
    None
}

/// Insert and queue a new operation. A concurrent request that created an
/// operation for the instance first decides the answer.
async fn start_or_join(state: &AppState, operation: Operation) -> AppResult<Accepted> {
    let requested = operation.operation_type;
    let instance_id = operation.instance_id.clone();
    match start(state, operation).await {
        Ok(accepted) => Ok(accepted),
        Err(StorageError::Conflict(reason)) => {
            tracing::debug!(instance_id = %instance_id, reason = %reason, "Concurrent request, rereading instance");
            let last = last_operation_of(state, &instance_id)
                .await?
                .ok_or_else(|| AppError::Conflict(reason.clone()))?;
            existing_answer(requested, &instance_id, &last).unwrap_or(Err(AppError::Conflict(reason)))
        }
        Err(e) => Err(e.into()),
    }
}

/// `PUT /v2/service_instances/{instance_id}`
///
/// - `202 Accepted` with the operation id when provisioning starts or is
///   already running
/// - `200 OK` when the instance is already provisioned
/// - `409 Conflict` while the instance is being deprovisioned
/// - `422 Unprocessable Entity` for an unknown plan
pub async fn provision(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Json(request): Json<ProvisionRequest>,
) -> AppResult<Accepted> {
    let parameters = request.into_parameters();
    if parameters.plan().is_none() {
        return Err(AppError::Validation(format!("unknown plan {}", parameters.plan_id)));
    }

    if let Some(last) = last_operation_of(&state, &instance_id).await? {
        if let Some(answer) = existing_answer(OperationType::Provision, &instance_id, &last) {
            return answer;
        }
    }

    let operation = Operation::new(&instance_id, OperationType::Provision, parameters);
    start_or_join(&state, operation).await
}

/// `DELETE /v2/service_instances/{instance_id}`
///
/// - `202 Accepted` with the operation id when deprovisioning starts or is
///   already running
/// - `200 OK` when the instance is already deprovisioned
/// - `404 Not Found` for an unknown instance
/// - `409 Conflict` while the instance is being provisioned
pub async fn deprovision(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> AppResult<Accepted> {
    let last = last_operation_of(&state, &instance_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("instance {}", instance_id)))?;

    if let Some(answer) = existing_answer(OperationType::Deprovision, &instance_id, &last) {
        return answer;
    }

    let mut operation = Operation::new(
        &instance_id,
        OperationType::Deprovision,
        last.provisioning_parameters.clone(),
    );
    operation.instance_details = last.instance_details;
    operation.instance_details.provisioner_operation_id = None;
    start_or_join(&state, operation).await
}

/// `GET /v2/service_instances/{instance_id}/last_operation`
///
/// Reports the operation named by the `operation` query parameter, or the
/// most recent one of the instance.
pub async fn last_operation(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(query): Query<LastOperationQuery>,
) -> AppResult<Json<LastOperationResponse>> {
    let operation = match query.operation {
        Some(operation_id) => {
            let op = state.operations.get_operation_by_id(&operation_id).await?;
            if op.instance_id != instance_id {
                return Err(AppError::NotFound(format!(
                    "operation {} of instance {}",
                    operation_id, instance_id
                )));
            }
            op
        }
        None => last_operation_of(&state, &instance_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("instance {}", instance_id)))?,
    };

    Ok(Json(operation.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use crate::config::AppConfig;
    use crate::provisioner::fake::FakeProvisioner;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use process_engine::events::NoopPublisher;
    use process_engine::operation::{AWS_PLAN_ID, OWN_CLUSTER_PLAN_ID};
    use process_engine::{MemoryStorage, Operations, ProcessConfig, Queue};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_state(storage: Arc<MemoryStorage>, provisioner: Arc<FakeProvisioner>) -> AppState {
        AppState::new(
            storage,
            provisioner,
            Arc::new(NoopPublisher),
            None,
            AppConfig::default(),
            ProcessConfig::default(),
        )
        .unwrap()
    }

    fn provision_body(plan_id: &str) -> Body {
        let request = serde_json::json!({
            "service_id": "runtime-service",
            "plan_id": plan_id,
            "global_account_id": "ga-1",
            "subaccount_id": "sa-1",
            "parameters": {"name": "my-runtime", "region": "eu-west-1"}
        });
        Body::from(request.to_string())
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn put(instance_id: &str, body: Body) -> Request<Body> {
        Request::put(format!("/v2/service_instances/{}", instance_id))
            .header("content-type", "application/json")
            .body(body)
            .unwrap()
    }

    fn delete(instance_id: &str) -> Request<Body> {
        Request::delete(format!("/v2/service_instances/{}", instance_id))
            .body(Body::empty())
            .unwrap()
    }

    fn get_last(instance_id: &str) -> Request<Body> {
        Request::get(format!("/v2/service_instances/{}/last_operation", instance_id))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_provision_creates_pending_operation() {
        let storage = Arc::new(MemoryStorage::new());
        let state = app_state(storage.clone(), Arc::new(FakeProvisioner::default()));
        let router = build_router(state.clone());

        let (status, body) = send(&router, put("instance-1", provision_body(AWS_PLAN_ID))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let operation_id = body["operation"].as_str().unwrap().to_string();
        assert_eq!(state.provisioning.len(), 1);

        let (status, again) = send(&router, put("instance-1", provision_body(AWS_PLAN_ID))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(again["operation"], operation_id.as_str());
        assert_eq!(storage.len().await, 1);

        let (status, last) = send(&router, get_last("instance-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(last["state"], "in progress");
        assert_eq!(last["operation"], operation_id.as_str());
    }

    #[tokio::test]
    async fn test_concurrent_provision_requests_share_operation() {
        let storage = Arc::new(MemoryStorage::new());
        let state = app_state(storage.clone(), Arc::new(FakeProvisioner::default()));
        let router = build_router(state.clone());

        let requests = (0..8).map(|_| {
            let router = router.clone();
            tokio::spawn(async move { send(&router, put("instance-1", provision_body(AWS_PLAN_ID))).await })
        });
        let mut operations = Vec::new();
        for handle in requests.collect::<Vec<_>>() {
            let (status, body) = handle.await.unwrap();
            assert_eq!(status, StatusCode::ACCEPTED);
            operations.push(body["operation"].as_str().unwrap().to_string());
        }

        operations.dedup();
        assert_eq!(operations.len(), 1);
        assert_eq!(storage.len().await, 1);
        assert_eq!(state.provisioning.len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_insert_answers_from_stored_operation() {
        let storage = Arc::new(MemoryStorage::new());
        let state = app_state(storage.clone(), Arc::new(FakeProvisioner::default()));
        let running = Operation::new("instance-1", OperationType::Provision, ProvisioningParameters::default());
        storage.insert_operation(running.clone()).await.unwrap();

        let late = Operation::new("instance-1", OperationType::Provision, ProvisioningParameters::default());
        let (status, Json(body)) = start_or_join(&state, late).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body.operation, running.id);

        let removal = Operation::new("instance-1", OperationType::Deprovision, ProvisioningParameters::default());
        let err = start_or_join(&state, removal).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_plan_is_rejected() {
        let state = app_state(Arc::new(MemoryStorage::new()), Arc::new(FakeProvisioner::default()));
        let router = build_router(state);

        let (status, body) = send(&router, put("instance-1", provision_body("no-such-plan"))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], 422);
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let state = app_state(Arc::new(MemoryStorage::new()), Arc::new(FakeProvisioner::default()));
        let router = build_router(state);

        let (status, _) = send(&router, delete("missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&router, get_last("missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_deprovision_while_provisioning_conflicts() {
        let state = app_state(Arc::new(MemoryStorage::new()), Arc::new(FakeProvisioner::default()));
        let router = build_router(state);

        send(&router, put("instance-1", provision_body(AWS_PLAN_ID))).await;
        let (status, _) = send(&router, delete("instance-1")).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    /// Wait until the last operation of the instance is terminal and its
    /// queue is done with it.
    async fn wait_for_state(
        storage: &MemoryStorage,
        queue: &Queue,
        instance_id: &str,
        operation_type: OperationType,
    ) -> Operation {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(op) = storage.get_last_operation(instance_id).await {
                if op.operation_type == operation_type
                    && op.state.is_terminal()
                    && !queue.is_processing(&op.id)
                {
                    return storage.get_operation_by_id(&op.id).await.unwrap();
                }
            }
            assert!(tokio::time::Instant::now() < deadline, "operation did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_provision_and_deprovision_end_to_end() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        let state = app_state(storage.clone(), provisioner.clone());
        let router = build_router(state.clone());

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let mut queues = Vec::new();
        for queue in [state.provisioning.clone(), state.deprovisioning.clone()] {
            let mut stop = stop_rx.clone();
            queues.push(tokio::spawn(async move {
                queue
                    .run(async move {
                        let _ = stop.changed().await;
                    })
                    .await;
            }));
        }

        send(&router, put("instance-1", provision_body(AWS_PLAN_ID))).await;
        let provisioned =
            wait_for_state(&storage, &state.provisioning, "instance-1", OperationType::Provision).await;
        assert_eq!(provisioned.state, OperationState::Succeeded);
        assert_eq!(
            provisioned.finished_stages,
            vec!["create_runtime", "post_actions", "finish"]
        );
        assert!(provisioned.instance_details.labels_applied);
        assert_eq!(provisioner.provision_count(), 1);

        let (status, _) = send(&router, put("instance-1", provision_body(AWS_PLAN_ID))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&router, delete("instance-1")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let deprovisioned =
            wait_for_state(&storage, &state.deprovisioning, "instance-1", OperationType::Deprovision).await;
        assert_eq!(deprovisioned.state, OperationState::Succeeded);
        assert_eq!(provisioner.deprovision_count(), 1);

        let (_, last) = send(&router, get_last("instance-1")).await;
        assert_eq!(last["state"], "succeeded");
        assert_eq!(last["description"], "Runtime deprovisioned");

        stop_tx.send(true).unwrap();
        for handle in queues {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_own_cluster_skips_provisioner() {
        let storage = Arc::new(MemoryStorage::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        let state = app_state(storage.clone(), provisioner.clone());

        let mut op = Operation::new(
            "instance-2",
            OperationType::Provision,
            ProvisioningParameters {
                plan_id: OWN_CLUSTER_PLAN_ID.to_string(),
                service_id: "runtime-service".to_string(),
                global_account_id: "ga-1".to_string(),
                subaccount_id: "sa-1".to_string(),
                kubeconfig: Some("apiVersion: v1".to_string()),
                ..Default::default()
            },
        );
        op.id = "own-1".to_string();
        storage.insert_operation(op).await.unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let queue = state.provisioning.clone();
        let handle = tokio::spawn(async move {
            queue
                .run(async move {
                    let _ = stop_rx.await;
                })
                .await;
        });
        state.enqueue("own-1", OperationType::Provision);

        let op =
            wait_for_state(&storage, &state.provisioning, "instance-2", OperationType::Provision).await;
        assert_eq!(op.state, OperationState::Succeeded);
        assert_eq!(provisioner.provision_count(), 0);
        assert_eq!(provisioner.label_count(), 0);

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
