//! The HTTP handler: per-request dispatch through the reserved-path
//! short-circuits, the route-sharing protocol tables, the stateful bridge,
//! and finally the matcher-driven mock response.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tokio::sync::{broadcast, RwLock};

use mockforge_core::{
    collect_near_misses, select_best_match, HttpMatcher, HttpResponse as MockHttpResponse,
    LogFilter, Mock, MockSpec, MockType, MqttSpec, NearMiss, OAuthSpec, Protocol, ProtocolDetail,
    RequestLogEntry, RequestLogger, SoapSpec, StatefulError, StatefulStore, TemplateContext,
    ValidationMode, ValidationOutcome, WebSocketSpec,
};

use crate::chunked::chunked_response;
use crate::route_handler::RouteHandler;
use crate::sse::sse_response;
use crate::store_handle::StoreHandle;
use crate::tls::MtlsIdentity;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const MAX_STATEFUL_BODY_BYTES: usize = 1 * 1024 * 1024;
const NEAR_MISS_LIMIT: usize = 3;

/// The HTTP handler's route-sharing protocol tables and shared state.
/// Constructed once by the server or workspace listener; its
/// route tables are mutated only by the protocol manager.
pub struct HttpHandler {
    store: StoreHandle,
    logger: RequestLogger,
    stateful: StatefulStore,
    base_dir: PathBuf,
    ws_routes: RwLock<HashMap<String, Arc<dyn RouteHandler>>>,
    graphql_routes: RwLock<HashMap<String, Arc<dyn RouteHandler>>>,
    graphql_subscription_routes: RwLock<HashMap<String, Arc<dyn RouteHandler>>>,
    oauth_routes: RwLock<HashMap<String, Arc<dyn RouteHandler>>>,
    soap_routes: RwLock<HashMap<String, Arc<dyn RouteHandler>>>,
    stateful_prefixes: RwLock<Vec<String>>,
    mock_hit_counter: AtomicU64,
    shutdown_tx: broadcast::Sender<String>,
}

impl HttpHandler {
    /// Construct a handler over `store`, rooted at `base_dir` for
    /// `bodyFile` resolution.
    pub fn new(store: StoreHandle, logger: RequestLogger, stateful: StatefulStore, base_dir: impl Into<PathBuf>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            store,
            logger,
            stateful,
            base_dir: base_dir.into(),
            ws_routes: RwLock::new(HashMap::new()),
            graphql_routes: RwLock::new(HashMap::new()),
            graphql_subscription_routes: RwLock::new(HashMap::new()),
            oauth_routes: RwLock::new(HashMap::new()),
            soap_routes: RwLock::new(HashMap::new()),
            stateful_prefixes: RwLock::new(Vec::new()),
            mock_hit_counter: AtomicU64::new(0),
            shutdown_tx,
        }
    }

    /// Total mock-hit count since construction, read by the management API.
    pub fn mock_hit_count(&self) -> u64 {
        self.mock_hit_counter.load(Ordering::Relaxed)
    }

    /// Register a generic WebSocket route (replaces any existing handler
    /// at the same path).
    pub async fn register_ws(&self, path: String, route: Arc<dyn RouteHandler>) {
        self.ws_routes.write().await.insert(path, route);
    }

    /// Unregister a generic WebSocket route.
    pub async fn unregister_ws(&self, path: &str) {
        self.ws_routes.write().await.remove(path);
    }

    /// Register a GraphQL query/mutation endpoint.
    pub async fn register_graphql(&self, path: String, route: Arc<dyn RouteHandler>) {
        self.graphql_routes.write().await.insert(path, route);
    }

    /// Register a GraphQL subscription endpoint.
    pub async fn register_graphql_subscription(&self, path: String, route: Arc<dyn RouteHandler>) {
        self.graphql_subscription_routes.write().await.insert(path, route);
    }

    /// Unregister both the query and subscription endpoints for a GraphQL path.
    pub async fn unregister_graphql(&self, path: &str, subscription_path: &str) {
        self.graphql_routes.write().await.remove(path);
        self.graphql_subscription_routes.write().await.remove(subscription_path);
    }

    /// Drop every registered GraphQL route (query and subscription),
    /// releasing the protocol handler references.
    pub async fn clear_graphql(&self) {
        self.graphql_routes.write().await.clear();
        self.graphql_subscription_routes.write().await.clear();
    }

    /// Sender half of the shutdown-broadcast channel, cloned into GraphQL
    /// subscription handlers at registration time so each open connection
    /// can be notified of a close reason without the handler reaching back
    /// into this table.
    pub fn shutdown_sender(&self) -> broadcast::Sender<String> {
        self.shutdown_tx.clone()
    }

    /// Broadcast a close reason to every open GraphQL subscription
    /// connection currently subscribed to the shutdown channel.
    pub fn broadcast_shutdown(&self, reason: &str) {
        let _ = self.shutdown_tx.send(reason.to_string());
    }

    /// Register an OAuth provider's routes under its issuer path prefix.
    pub async fn register_oauth(&self, issuer_path: String, route: Arc<dyn RouteHandler>) {
        self.oauth_routes.write().await.insert(issuer_path, route);
    }

    /// Unregister an OAuth provider.
    pub async fn unregister_oauth(&self, issuer_path: &str) {
        self.oauth_routes.write().await.remove(issuer_path);
    }

    /// Drop every registered OAuth provider, releasing its handler reference.
    pub async fn clear_oauth(&self) {
        self.oauth_routes.write().await.clear();
    }

    /// Register a SOAP endpoint.
    pub async fn register_soap(&self, path: String, route: Arc<dyn RouteHandler>) {
        self.soap_routes.write().await.insert(path, route);
    }

    /// Unregister a SOAP endpoint.
    pub async fn unregister_soap(&self, path: &str) {
        self.soap_routes.write().await.remove(path);
    }

    /// Drop every registered SOAP endpoint, releasing its handler reference.
    pub async fn clear_soap(&self) {
        self.soap_routes.write().await.clear();
    }

    /// Declare a stateful-resource path prefix (e.g. `/api/widgets`).
    pub async fn register_stateful_prefix(&self, prefix: String) {
        self.stateful_prefixes.write().await.push(prefix);
    }

    async fn stateful_resource_for_path<'a>(&self, path: &'a str) -> Option<(String, &'a str)> {
        let prefixes = self.stateful_prefixes.read().await;
        for prefix in prefixes.iter() {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                let resource = prefix.trim_start_matches('/').to_string();
                let id = rest.trim_start_matches('/');
                return Some((resource, id));
            }
        }
        None
    }

    /// Number of registered GraphQL query/mutation endpoints.
    pub async fn graphql_route_count(&self) -> usize {
        self.graphql_routes.read().await.len()
    }

    /// Number of registered OAuth provider route prefixes.
    pub async fn oauth_route_count(&self) -> usize {
        self.oauth_routes.read().await.len()
    }

    /// Number of registered SOAP endpoints.
    pub async fn soap_route_count(&self) -> usize {
        self.soap_routes.read().await.len()
    }

    /// Number of registered generic WebSocket endpoints.
    pub async fn ws_route_count(&self) -> usize {
        self.ws_routes.read().await.len()
    }

    async fn oauth_route_for(&self, path: &str) -> Option<Arc<dyn RouteHandler>> {
        let routes = self.oauth_routes.read().await;
        routes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, handler)| handler.clone())
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let has_upgrade_header = headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let has_connection_upgrade = headers
        .get(axum::http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    has_upgrade_header && has_connection_upgrade
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

fn query_to_map(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn error_json(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({ "error": error, "message": message }))).into_response()
}

fn health_response() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

fn auto_detect_content_type(body: &str) -> &'static str {
    let trimmed = body.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('[')) && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        "application/json"
    } else if trimmed.starts_with("<?xml") || trimmed.starts_with('<') {
        "application/xml"
    } else {
        "text/plain"
    }
}

fn stateful_error_response(resource: &str, id: &str, err: StatefulError) -> Response {
    let status = err.status_code();
    let body = json!({
        "error": "stateful_error",
        "resource": resource,
        "id": id,
        "statusCode": status,
        "hint": err.hint(),
    });
    (StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), Json(body)).into_response()
}

#[allow(clippy::too_many_arguments)]
async fn log_and_return(
    handler: &HttpHandler,
    start: Instant,
    protocol: Protocol,
    method: &Method,
    path: String,
    query: String,
    headers: HashMap<String, String>,
    body: Option<String>,
    remote_addr: Option<String>,
    matched_mock_id: String,
    status: u16,
    detail: ProtocolDetail,
    near_misses: Vec<NearMiss>,
    response: Response,
) -> Response {
    handler
        .logger
        .log(RequestLogEntry {
            id: String::new(),
            timestamp: chrono::Utc::now(),
            protocol,
            method: method.to_string(),
            path,
            query,
            headers,
            body,
            remote_addr,
            matched_mock_id,
            status,
            duration_ms: start.elapsed().as_millis() as u64,
            detail: Some(detail),
            near_misses,
        })
        .await;
    response
}

/// Dispatch one inbound HTTP request through the full handler pipeline.
/// Every return path logs its entry through the shared [`RequestLogger`]
/// before handing the response back to the caller.
pub async fn handle(handler: Arc<HttpHandler>, req: Request<Body>) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let headers = req.headers().clone();
    let header_map = headers_to_map(&headers);
    let remote_addr = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()).map(str::to_string);
    let mtls_identity = req.extensions().get::<MtlsIdentity>().cloned();

    // 2. Reserved paths always short-circuit.
    if path == "/__mockd/health" || path == "/__mockd/ready" {
        let resp = health_response();
        return log_and_return(
            &handler,
            start,
            Protocol::Http,
            &method,
            path,
            query,
            header_map,
            None,
            remote_addr,
            "__mockd:health".to_string(),
            200,
            ProtocolDetail::default(),
            Vec::new(),
            resp,
        )
        .await;
    }

    // 3. WebSocket upgrade: GraphQL subscriptions first, then generic WS.
    if is_websocket_upgrade(&headers) {
        if let Some(route) = handler.graphql_subscription_routes.read().await.get(&path).cloned() {
            let matched = path.clone();
            let resp = route.handle(req).await;
            let status = resp.status().as_u16();
            return log_and_return(
                &handler,
                start,
                Protocol::GraphQl,
                &method,
                path,
                query,
                header_map,
                None,
                remote_addr,
                matched,
                status,
                ProtocolDetail { graphql_op_type: Some("subscription".to_string()), ..Default::default() },
                Vec::new(),
                resp,
            )
            .await;
        }
        if let Some(route) = handler.ws_routes.read().await.get(&path).cloned() {
            let matched = path.clone();
            let resp = route.handle(req).await;
            let status = resp.status().as_u16();
            return log_and_return(
                &handler,
                start,
                Protocol::WebSocket,
                &method,
                path,
                query,
                header_map,
                None,
                remote_addr,
                matched,
                status,
                ProtocolDetail::default(),
                Vec::new(),
                resp,
            )
            .await;
        }
    }

    // 4. GraphQL / OAuth / SOAP route tables, in order.
    if let Some(route) = handler.graphql_routes.read().await.get(&path).cloned() {
        let matched = path.clone();
        let resp = route.handle(req).await;
        let status = resp.status().as_u16();
        return log_and_return(
            &handler,
            start,
            Protocol::GraphQl,
            &method,
            path,
            query,
            header_map,
            None,
            remote_addr,
            matched,
            status,
            ProtocolDetail { graphql_op_type: Some("query".to_string()), ..Default::default() },
            Vec::new(),
            resp,
        )
        .await;
    }
    if let Some(route) = handler.oauth_route_for(&path).await {
        let matched = path.clone();
        let resp = route.handle(req).await;
        let status = resp.status().as_u16();
        return log_and_return(
            &handler,
            start,
            Protocol::OAuth,
            &method,
            path,
            query,
            header_map,
            None,
            remote_addr,
            matched,
            status,
            ProtocolDetail::default(),
            Vec::new(),
            resp,
        )
        .await;
    }
    if let Some(route) = handler.soap_routes.read().await.get(&path).cloned() {
        let matched = path.clone();
        let resp = route.handle(req).await;
        let status = resp.status().as_u16();
        return log_and_return(
            &handler,
            start,
            Protocol::Soap,
            &method,
            path,
            query,
            header_map,
            None,
            remote_addr,
            matched,
            status,
            ProtocolDetail::default(),
            Vec::new(),
            resp,
        )
        .await;
    }

    let query_params = query_to_map(&query);

    // 8. Stateful resource CRUD on matching path prefix.
    if let Some((resource, id)) = handler.stateful_resource_for_path(&path).await {
        let matched = format!("stateful:{resource}");
        let resp = handle_stateful(&handler, &method, &resource, id, req).await;
        let status = resp.status().as_u16();
        return log_and_return(
            &handler,
            start,
            Protocol::Http,
            &method,
            path,
            query,
            header_map,
            None,
            remote_addr,
            matched,
            status,
            ProtocolDetail::default(),
            Vec::new(),
            resp,
        )
        .await;
    }

    // 6-7. Body cap + header snapshot (headers already snapshotted above).
    let body_result = to_bytes(req.into_body(), MAX_BODY_BYTES).await;
    let body_bytes = match body_result {
        Ok(b) => b,
        Err(_) => {
            let resp = error_json(StatusCode::PAYLOAD_TOO_LARGE, "body_too_large", "request body exceeds the 10 MiB cap");
            return log_and_return(
                &handler,
                start,
                Protocol::Http,
                &method,
                path,
                query,
                header_map,
                None,
                remote_addr,
                String::new(),
                413,
                ProtocolDetail::default(),
                Vec::new(),
                resp,
            )
            .await;
        }
    };
    let body_str = String::from_utf8(body_bytes.to_vec()).ok();

    // 9. Candidate scan, scored selection, HEAD->GET fallback.
    let mut mocks = handler.store.list_by_type(MockType::Http).await;
    mocks.retain(Mock::is_enabled);
    let match_req = mockforge_core::MatchRequest {
        method: method.as_str(),
        path: &path,
        headers: &header_map,
        query_params: &query_params,
        body: body_str.as_deref(),
    };
    let mut outcome = select_best_match(&mocks, &match_req);
    if outcome.is_none() && method == Method::HEAD {
        let get_req = mockforge_core::MatchRequest {
            method: "GET",
            path: &path,
            headers: &header_map,
            query_params: &query_params,
            body: body_str.as_deref(),
        };
        outcome = select_best_match(&mocks, &get_req);
    }

    let (response, matched_mock_id, near_misses, status) = match outcome {
        Some(outcome) => {
            handler.mock_hit_counter.fetch_add(1, Ordering::Relaxed);
            let mock = &mocks[outcome.mock_index];
            let MockSpec::Http(http) = &mock.spec else {
                unreachable!("select_best_match only returns HTTP mocks")
            };
            let resp = emit_standard_response(
                &handler,
                http_mock_context(&method, &path, &query, &header_map, body_str.as_deref(), &outcome.captures, mtls_identity.as_ref(), &http.response),
                &http.response,
                &http.matcher,
                body_str.as_deref(),
            )
            .await;
            let status = resp.status().as_u16();
            (resp, mock.id.clone(), Vec::new(), status)
        }
        None => {
            if path == "/health" || path == "/ready" {
                (health_response(), String::new(), Vec::new(), 200)
            } else {
                let misses = collect_near_misses(&mocks, &match_req, NEAR_MISS_LIMIT);
                let count = misses.len();
                let mut resp = (
                    StatusCode::NOT_FOUND,
                    Json(json!({
                        "error": "no_match",
                        "message": "no mock matched this request",
                        "path": path,
                        "method": method.as_str(),
                        "nearMisses": misses,
                    })),
                )
                    .into_response();
                resp.headers_mut().insert(
                    "x-mockd-near-misses",
                    axum::http::HeaderValue::from_str(&count.to_string()).unwrap(),
                );
                (resp, String::new(), misses, 404)
            }
        }
    };

    // 12. Log the entry.
    handler
        .logger
        .log(RequestLogEntry {
            id: String::new(),
            timestamp: chrono::Utc::now(),
            protocol: Protocol::Http,
            method: method.to_string(),
            path,
            query,
            headers: header_map,
            body: body_str,
            remote_addr,
            matched_mock_id,
            status,
            duration_ms: start.elapsed().as_millis() as u64,
            detail: Some(ProtocolDetail::default()),
            near_misses,
        })
        .await;

    response
}

#[allow(clippy::too_many_arguments)]
fn http_mock_context(
    method: &Method,
    path: &str,
    query: &str,
    headers: &HashMap<String, String>,
    body: Option<&str>,
    captures: &HashMap<String, String>,
    mtls: Option<&MtlsIdentity>,
    response: &MockHttpResponse,
) -> TemplateContext {
    let seed = TemplateContext::resolve_seed(&query_to_map(query), headers, response.seed);
    TemplateContext::new(
        method.to_string(),
        path.to_string(),
        query.to_string(),
        headers.clone(),
        body.map(str::to_string),
        captures.clone(),
        mtls.and_then(|m| m.common_name.clone()),
        seed,
    )
}

async fn emit_standard_response(
    handler: &HttpHandler,
    ctx: TemplateContext,
    response: &MockHttpResponse,
    _matcher: &HttpMatcher,
    request_body: Option<&str>,
) -> Response {
    if let Some(delay) = response.delay_ms {
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
    }

    if let Some(validation) = &response.validation {
        if let Some(body) = request_body {
            match mockforge_core::validate(&validation.schema, validation.mode, validation.reject_status, body) {
                ValidationOutcome::Reject { status, errors } => {
                    return (
                        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
                        Json(json!({ "error": "validation_rejected", "message": errors.join("; ") })),
                    )
                        .into_response();
                }
                ValidationOutcome::Warn { errors } => {
                    tracing::warn!(?errors, "request body failed mock validation (warn mode)");
                }
                ValidationOutcome::Pass => {}
            }
        } else if validation.mode != ValidationMode::Warn {
            return (
                StatusCode::from_u16(validation.reject_status.unwrap_or(400)).unwrap_or(StatusCode::BAD_REQUEST),
                Json(json!({ "error": "validation_rejected", "message": "request body is empty" })),
            )
                .into_response();
        }
    }

    if let Some(stateful_op) = &response.stateful_operation {
        return dispatch_stateful_operation(handler, stateful_op, &ctx, request_body).await;
    }

    if let Some(sse) = &response.sse {
        return sse_response(sse.clone(), ctx);
    }
    if let Some(chunked) = &response.chunked {
        return chunked_response(chunked.clone(), ctx, response.status_code);
    }

    let mut builder = Response::builder().status(response.status_code);
    let mut content_type_set = false;
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("content-type") {
            content_type_set = true;
        }
        builder = builder.header(name, ctx.expand(value));
    }

    let body = match (&response.body, &response.body_file) {
        (Some(inline), _) => ctx.expand(inline),
        (None, Some(file_path)) => match read_body_file(&handler.base_dir, file_path).await {
            Ok(contents) => ctx.expand(&contents),
            Err(e) => {
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "body_file_error", "message": e.to_string() })),
                )
                    .into_response();
            }
        },
        (None, None) => String::new(),
    };

    if !content_type_set {
        builder = builder.header(axum::http::header::CONTENT_TYPE, auto_detect_content_type(&body));
    }

    builder.body(Body::from(body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn read_body_file(base_dir: &Path, rel_path: &str) -> mockforge_core::Result<String> {
    if rel_path.split('/').any(|seg| seg == "..") {
        return Err(mockforge_core::Error::BodyFile {
            message: format!("bodyFile path escapes base directory: {rel_path}"),
        });
    }
    let resolved = base_dir.join(rel_path);
    tokio::fs::read_to_string(&resolved)
        .await
        .map_err(|e| mockforge_core::Error::BodyFile {
            message: format!("failed to read body file {}: {e}", resolved.display()),
        })
}

async fn dispatch_stateful_operation(
    handler: &HttpHandler,
    op: &mockforge_core::StatefulOperationSpec,
    ctx: &TemplateContext,
    request_body: Option<&str>,
) -> Response {
    let body_value: serde_json::Value = request_body
        .and_then(|b| serde_json::from_str(b).ok())
        .unwrap_or(serde_json::Value::Null);
    let id = op.id_from.as_deref().map(|tpl| ctx.expand(tpl)).unwrap_or_default();
    let result = match op.operation.as_str() {
        "list" => handler.stateful.list(&op.resource).await.map(serde_json::Value::Array),
        "get" => handler.stateful.get(&op.resource, &id).await,
        "create" => handler.stateful.create(&op.resource, body_value).await,
        "update" => handler.stateful.update(&op.resource, &id, body_value).await,
        "delete" => handler.stateful.delete(&op.resource, &id).await.map(|()| serde_json::Value::Null),
        "patch" => handler.stateful.patch(&op.resource, &id, body_value).await,
        _ => Err(StatefulError::Validation(format!("unknown stateful operation {}", op.operation))),
    };
    match result {
        Ok(serde_json::Value::Null) if op.operation == "delete" => StatusCode::NO_CONTENT.into_response(),
        Ok(v) => Json(v).into_response(),
        Err(e) => stateful_error_response(&op.resource, &id, e),
    }
}

async fn handle_stateful(
    handler: &HttpHandler,
    method: &Method,
    resource: &str,
    id: &str,
    req: Request<Body>,
) -> Response {
    let body_bytes = match method {
        &Method::POST | &Method::PUT | &Method::PATCH => {
            match to_bytes(req.into_body(), MAX_STATEFUL_BODY_BYTES).await {
                Ok(b) => b,
                Err(_) => {
                    return error_json(StatusCode::PAYLOAD_TOO_LARGE, "body_too_large", "stateful request body exceeds the 1 MiB cap");
                }
            }
        }
        _ => axum::body::Bytes::new(),
    };
    let body_value: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null);

    let result = match *method {
        Method::GET if id.is_empty() => handler.stateful.list(resource).await.map(serde_json::Value::Array),
        Method::GET => handler.stateful.get(resource, id).await,
        Method::POST => handler.stateful.create(resource, body_value).await,
        Method::PUT => handler.stateful.update(resource, id, body_value).await,
        Method::PATCH => handler.stateful.patch(resource, id, body_value).await,
        Method::DELETE => handler.stateful.delete(resource, id).await.map(|_| serde_json::Value::Null),
        _ => Err(StatefulError::Validation("unsupported method for stateful resource".to_string())),
    };

    match result {
        Ok(serde_json::Value::Null) if *method == Method::DELETE => StatusCode::NO_CONTENT.into_response(),
        Ok(v) => Json(v).into_response(),
        Err(e) => stateful_error_response(resource, id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_detects_json_from_object_body() {
        assert_eq!(auto_detect_content_type(r#"{"a":1}"#), "application/json");
    }

    #[test]
    fn auto_detects_xml_from_angle_bracket_body() {
        assert_eq!(auto_detect_content_type("<root/>"), "application/xml");
    }

    #[test]
    fn falls_back_to_text_plain() {
        assert_eq!(auto_detect_content_type("hello"), "text/plain");
    }

    #[test]
    fn detects_websocket_upgrade_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::UPGRADE, "websocket".parse().unwrap());
        headers.insert(axum::http::header::CONNECTION, "Upgrade".parse().unwrap());
        assert!(is_websocket_upgrade(&headers));
    }

    fn test_handler() -> HttpHandler {
        HttpHandler::new(
            StoreHandle::from(mockforge_core::MockStore::new()),
            RequestLogger::new(100),
            StatefulStore::new(),
            ".",
        )
    }

    fn ctx_with_id(id: &str) -> TemplateContext {
        let mut params = HashMap::new();
        params.insert("id".to_string(), id.to_string());
        TemplateContext::new(
            "GET".to_string(),
            "/widgets".to_string(),
            String::new(),
            HashMap::new(),
            None,
            params,
            None,
            None,
        )
    }

    fn op(operation: &str) -> mockforge_core::StatefulOperationSpec {
        mockforge_core::StatefulOperationSpec {
            resource: "widgets".to_string(),
            operation: operation.to_string(),
            id_from: Some("{{params.id}}".to_string()),
        }
    }

    #[tokio::test]
    async fn dispatch_stateful_operation_covers_all_six_operations() {
        let handler = test_handler();
        handler.stateful.declare_resource("widgets", None).await;

        let created = dispatch_stateful_operation(&handler, &op("create"), &ctx_with_id(""), Some(r#"{"id":"w1","name":"a"}"#)).await;
        assert_eq!(created.status(), StatusCode::OK);

        let fetched = dispatch_stateful_operation(&handler, &op("get"), &ctx_with_id("w1"), None).await;
        assert_eq!(fetched.status(), StatusCode::OK);

        let listed = dispatch_stateful_operation(&handler, &op("list"), &ctx_with_id(""), None).await;
        assert_eq!(listed.status(), StatusCode::OK);

        let updated = dispatch_stateful_operation(&handler, &op("update"), &ctx_with_id("w1"), Some(r#"{"name":"b"}"#)).await;
        assert_eq!(updated.status(), StatusCode::OK);

        let patched = dispatch_stateful_operation(&handler, &op("patch"), &ctx_with_id("w1"), Some(r#"{"name":"c"}"#)).await;
        assert_eq!(patched.status(), StatusCode::OK);

        let deleted = dispatch_stateful_operation(&handler, &op("delete"), &ctx_with_id("w1"), None).await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let missing = dispatch_stateful_operation(&handler, &op("get"), &ctx_with_id("w1"), None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dispatch_stateful_operation_rejects_unknown_operation() {
        let handler = test_handler();
        handler.stateful.declare_resource("widgets", None).await;
        let resp = dispatch_stateful_operation(&handler, &op("replace"), &ctx_with_id(""), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
