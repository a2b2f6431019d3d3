//! The control API: a thin HTTP adapter exposing the store, matcher,
//! logger and protocol manager as management endpoints on a separate
//! port.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

use mockforge_core::{LogFilter, Mock, RequestLogger, StatefulStore};

use crate::handler::HttpHandler;
use crate::middleware::{ChaosInjector, Metrics};
use crate::mock_manager::MockManager;
use crate::protocol_manager::ProtocolManager;

/// Shared state behind every management endpoint.
#[derive(Clone)]
pub struct ControlApiState {
    /// Mock lifecycle (add/update/delete/clear)
    pub mock_manager: Arc<MockManager>,
    /// Request log
    pub logger: RequestLogger,
    /// Protocol instance lifecycle
    pub protocol_manager: Arc<ProtocolManager>,
    /// Shared HTTP handler
    pub http_handler: Arc<HttpHandler>,
    /// Stateful resource bridge
    pub stateful: StatefulStore,
    /// Request-count metrics
    pub metrics: Arc<Metrics>,
    /// Dynamic chaos injector (swappable; `GET|PUT /chaos` toggles it)
    pub chaos: Arc<dyn ChaosInjector>,
    /// Process start time, for `uptime_seconds`
    pub start_time: Instant,
}

/// Build the management router.
pub fn build_router(state: ControlApiState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/mocks", get(list_mocks).post(add_mock))
        .route("/mocks/{id}", get(get_mock).put(update_mock).delete(delete_mock))
        .route("/mocks/{id}/toggle", post(toggle_mock))
        .route("/mocks/{id}/requests", delete(clear_mock_requests))
        .route("/deploy", post(deploy))
        .route("/undeploy", post(undeploy))
        .route("/requests", get(list_requests).delete(clear_requests))
        .route("/requests/{id}", get(get_request))
        .route("/protocols", get(protocols))
        .route("/chaos", get(get_chaos).put(put_chaos))
        .route("/chaos/stats", get(chaos_stats))
        .route("/chaos/stats/reset", post(reset_chaos_stats))
        .route("/state", get(list_state))
        .route("/state/reset", post(reset_state))
        .route("/state/{name}", get(get_state).delete(delete_state))
        .with_state(state)
}

fn error_json(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": error, "message": message.into() }))).into_response()
}

async fn status(State(state): State<ControlApiState>) -> Response {
    Json(json!({
        "running": true,
        "uptimeSeconds": state.start_time.elapsed().as_secs(),
        "mockCount": state.mock_manager.count().await,
        "requestLogCount": state.logger.list(&LogFilter::default()).await.len(),
        "totalRequests": state.metrics.total_requests(),
        "protocols": state.protocol_manager.status(&state.http_handler).await,
    }))
    .into_response()
}

async fn list_mocks(State(state): State<ControlApiState>) -> Response {
    Json(state.mock_manager.list().await).into_response()
}

async fn get_mock(State(state): State<ControlApiState>, Path(id): Path<String>) -> Response {
    match state.mock_manager.get(&id).await {
        Some(mock) => Json(mock).into_response(),
        None => error_json(StatusCode::NOT_FOUND, "not_found", format!("no mock with id {id}")),
    }
}

async fn add_mock(State(state): State<ControlApiState>, Json(mock): Json<Mock>) -> Response {
    match state.mock_manager.add(mock).await {
        Ok(mock) => (StatusCode::CREATED, Json(mock)).into_response(),
        Err(e) => map_mutation_error(e),
    }
}

async fn update_mock(State(state): State<ControlApiState>, Path(id): Path<String>, Json(mock): Json<Mock>) -> Response {
    match state.mock_manager.update(&id, mock).await {
        Ok(mock) => Json(mock).into_response(),
        Err(e) => map_mutation_error(e),
    }
}

async fn delete_mock(State(state): State<ControlApiState>, Path(id): Path<String>) -> Response {
    match state.mock_manager.delete(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_json(StatusCode::NOT_FOUND, "not_found", format!("no mock with id {id}")),
        Err(e) => map_mutation_error(e),
    }
}

#[derive(Deserialize)]
struct TogglePayload {
    enabled: bool,
}

async fn toggle_mock(State(state): State<ControlApiState>, Path(id): Path<String>, Json(payload): Json<TogglePayload>) -> Response {
    match state.mock_manager.toggle(&id, payload.enabled).await {
        Ok(mock) => Json(mock).into_response(),
        Err(e) => map_mutation_error(e),
    }
}

#[derive(Deserialize)]
struct DeployPayload {
    mocks: Vec<Mock>,
    #[serde(default)]
    replace: bool,
}

async fn deploy(State(state): State<ControlApiState>, Json(payload): Json<DeployPayload>) -> Response {
    match state.mock_manager.deploy(payload.mocks, payload.replace).await {
        Ok(mocks) => Json(json!({ "added": mocks.len(), "mocks": mocks })).into_response(),
        Err(e) => map_mutation_error(e),
    }
}

async fn undeploy(State(state): State<ControlApiState>) -> Response {
    state.mock_manager.clear().await;
    StatusCode::NO_CONTENT.into_response()
}

fn map_mutation_error(e: mockforge_core::Error) -> Response {
    match e {
        mockforge_core::Error::DuplicateId { id } => {
            error_json(StatusCode::CONFLICT, "duplicate_id", format!("mock id {id} already exists"))
        }
        mockforge_core::Error::NotFound { id } => error_json(StatusCode::NOT_FOUND, "not_found", format!("no mock with id {id}")),
        mockforge_core::Error::Validation { message } => error_json(StatusCode::BAD_REQUEST, "validation_error", message),
        mockforge_core::Error::PortBindFailure { message } => error_json(StatusCode::BAD_GATEWAY, "port_bind_failure", message),
        other => error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", other.to_string()),
    }
}

async fn list_requests(State(state): State<ControlApiState>, Query(filter): Query<LogFilter>) -> Response {
    Json(state.logger.list(&filter).await).into_response()
}

async fn get_request(State(state): State<ControlApiState>, Path(id): Path<String>) -> Response {
    match state.logger.get(&id).await {
        Some(entry) => Json(entry).into_response(),
        None => error_json(StatusCode::NOT_FOUND, "not_found", format!("no request log entry with id {id}")),
    }
}

async fn clear_requests(State(state): State<ControlApiState>) -> Response {
    state.logger.clear().await;
    StatusCode::NO_CONTENT.into_response()
}

async fn clear_mock_requests(State(state): State<ControlApiState>, Path(id): Path<String>) -> Response {
    state.logger.clear_by_mock_id(&id).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn protocols(State(state): State<ControlApiState>) -> Response {
    Json(state.protocol_manager.status(&state.http_handler).await).into_response()
}

async fn get_chaos(State(state): State<ControlApiState>) -> Response {
    Json(json!({ "enabled": state.chaos.is_enabled() })).into_response()
}

#[derive(Deserialize)]
struct ChaosPayload {
    enabled: bool,
}

async fn put_chaos(State(state): State<ControlApiState>, Json(payload): Json<ChaosPayload>) -> Response {
    state.chaos.set_enabled(payload.enabled);
    Json(json!({ "enabled": state.chaos.is_enabled() })).into_response()
}

async fn chaos_stats(State(state): State<ControlApiState>) -> Response {
    Json(json!({ "enabled": state.chaos.is_enabled(), "injectedCount": 0 })).into_response()
}

async fn reset_chaos_stats() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

async fn list_state(State(state): State<ControlApiState>) -> Response {
    let names = state.stateful.resource_names().await;
    let mut counts = Vec::with_capacity(names.len());
    for name in names {
        let count = state.stateful.list(&name).await.map(|items| items.len()).unwrap_or(0);
        counts.push(json!({ "resource": name, "count": count }));
    }
    Json(counts).into_response()
}

async fn reset_state(State(state): State<ControlApiState>) -> Response {
    state.stateful.reset_all().await;
    StatusCode::NO_CONTENT.into_response()
}

async fn get_state(State(state): State<ControlApiState>, Path(name): Path<String>) -> Response {
    match state.stateful.list(&name).await {
        Ok(items) => Json(items).into_response(),
        Err(_) => error_json(StatusCode::NOT_FOUND, "not_found", format!("no stateful resource {name}")),
    }
}

async fn delete_state(State(state): State<ControlApiState>, Path(name): Path<String>) -> Response {
    match state.stateful.reset_resource(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => error_json(StatusCode::NOT_FOUND, "not_found", format!("no stateful resource {name}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_payload_deserializes() {
        let payload: TogglePayload = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert!(payload.enabled);
    }
}
