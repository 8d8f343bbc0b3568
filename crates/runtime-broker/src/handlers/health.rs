//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::db::health_check as db_health_check;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
}

/// Detailed health status.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiHealthResponse {
    pub status: String,

    /// `memory` or `postgres`.
    pub storage: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    pub queued_operations: usize,

    pub uptime_seconds: u64,

    pub version: String,
}

/// `GET /health`
///
/// Liveness check; always `200 OK` while the server runs.
pub async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "ok".to_string(),
    })
}

/// `GET /api/health`
///
/// `503 Service Unavailable` when the configured database is unreachable.
pub async fn api_health(State(state): State<AppState>) -> (StatusCode, Json<ApiHealthResponse>) {
    let (healthy, storage, database) = match &state.db {
        Some(pool) => {
            let connected = db_health_check(pool).await;
            let database = if connected { "connected" } else { "disconnected" };
            (connected, "postgres", Some(database.to_string()))
        }
        None => (true, "memory", None),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = ApiHealthResponse {
        status: if healthy { "ok" } else { "unhealthy" }.to_string(),
        storage: storage.to_string(),
        database,
        queued_operations: state.provisioning.len() + state.deprovisioning.len(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
