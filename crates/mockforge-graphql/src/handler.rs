//! `RouteHandler` implementations registered on the shared HTTP listener:
//! a POST query/mutation endpoint, and a `graphql-transport-ws` subscription
//! endpoint mounted at `<path>/ws`.

use std::collections::HashMap;
use std::time::Instant;

use async_graphql::dynamic::Schema;
use async_graphql::{Request as GraphQlRequest, Variables};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use mockforge_core::{Protocol, ProtocolDetail, RequestLogEntry, RequestLogger};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use mockforge_http::RouteHandler;

const MAX_GRAPHQL_BODY: usize = 2 * 1024 * 1024;

/// Serves POST GraphQL query/mutation requests against a dynamically
/// resolved schema.
pub struct GraphQlQueryHandler {
    schema: Schema,
    logger: RequestLogger,
}

impl GraphQlQueryHandler {
    /// Build a handler over an already-constructed dynamic `schema`,
    /// logging every execution through `logger`.
    pub fn new(schema: Schema, logger: RequestLogger) -> Self {
        Self { schema, logger }
    }
}

#[async_trait]
impl RouteHandler for GraphQlQueryHandler {
    async fn handle(&self, req: Request<Body>) -> Response {
        let start = Instant::now();
        let path = req.uri().path().to_string();
        let body = match to_bytes(req.into_body(), MAX_GRAPHQL_BODY).await {
            Ok(b) => b,
            Err(_) => {
                return (
                    axum::http::StatusCode::PAYLOAD_TOO_LARGE,
                    axum::Json(json!({ "error": "body_too_large", "message": "GraphQL request body too large" })),
                )
                    .into_response()
            }
        };
        let parsed: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                return (
                    axum::http::StatusCode::BAD_REQUEST,
                    axum::Json(json!({ "error": "invalid_request", "message": e.to_string() })),
                )
                    .into_response()
            }
        };
        let query = parsed.get("query").and_then(Value::as_str).unwrap_or("").to_string();
        let variables = parsed
            .get("variables")
            .cloned()
            .map(Variables::from_json)
            .unwrap_or_default();

        let gql_request = GraphQlRequest::new(query.clone()).variables(variables);
        let response = self.schema.execute(gql_request).await;
        let resp = axum::Json(response).into_response();

        let op_type = detect_operation_type(&query);
        self.logger
            .log(RequestLogEntry {
                id: String::new(),
                timestamp: chrono::Utc::now(),
                protocol: Protocol::GraphQl,
                method: "POST".to_string(),
                path,
                query: String::new(),
                headers: HashMap::new(),
                body: Some(query),
                remote_addr: None,
                matched_mock_id: String::new(),
                status: 200,
                duration_ms: start.elapsed().as_millis() as u64,
                detail: Some(ProtocolDetail { graphql_op_type: Some(op_type.to_string()), ..Default::default() }),
                near_misses: Vec::new(),
            })
            .await;

        resp
    }
}

fn detect_operation_type(query: &str) -> &'static str {
    let trimmed = query.trim_start();
    if trimmed.starts_with("mutation") {
        "mutation"
    } else if trimmed.starts_with("subscription") {
        "subscription"
    } else {
        "query"
    }
}

/// Serves the `<path>/ws` subscription endpoint over `graphql-transport-ws`
/// (a minimal subset: `connection_init` -> `connection_ack`, then one
/// `next` message per subscribe carrying a default-resolved payload,
/// followed by `complete`). Each connection subscribes to `shutdown` so a
/// server-wide stop can close it with a reason rather than dropping it.
pub struct GraphQlSubscriptionHandler {
    schema: Schema,
    logger: RequestLogger,
    shutdown: broadcast::Sender<String>,
}

impl GraphQlSubscriptionHandler {
    /// Build a subscription handler over the same dynamic `schema`.
    pub fn new(schema: Schema, logger: RequestLogger, shutdown: broadcast::Sender<String>) -> Self {
        Self { schema, logger, shutdown }
    }
}

#[async_trait]
impl RouteHandler for GraphQlSubscriptionHandler {
    async fn handle(&self, req: Request<Body>) -> Response {
        let path = req.uri().path().to_string();
        let Ok(upgrade) = WebSocketUpgrade::from_request(req, &()).await else {
            return axum::http::StatusCode::BAD_REQUEST.into_response();
        };
        let schema = self.schema.clone();
        let logger = self.logger.clone();
        let shutdown = self.shutdown.subscribe();
        upgrade
            .protocols(["graphql-transport-ws"])
            .on_upgrade(move |socket| handle_socket(socket, schema, logger, path, shutdown))
    }
}

async fn handle_socket(
    mut socket: WebSocket,
    schema: Schema,
    logger: RequestLogger,
    path: String,
    mut shutdown: broadcast::Receiver<String>,
) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    loop {
        tokio::select! {
            reason = shutdown.recv() => {
                let reason = reason.unwrap_or_else(|_| "server stopping".to_string());
                let frame = CloseFrame { code: 1001, reason: reason.into() };
                let _ = socket.send(Message::Close(Some(frame))).await;
                return;
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { return };
                let Message::Text(text) = msg else { continue };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                let Some(frame_type) = frame.get("type").and_then(Value::as_str) else { continue };
                match frame_type {
                    "connection_init" => {
                        let ack = json!({ "type": "connection_ack" });
                        if socket.send(Message::Text(ack.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    "subscribe" => {
                        let id = frame.get("id").and_then(Value::as_str).unwrap_or("1").to_string();
                        let query = frame
                            .get("payload")
                            .and_then(|p| p.get("query"))
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        debug!(%id, %query, "graphql subscription request");
                        let start = Instant::now();
                        let response = schema.execute(GraphQlRequest::new(query.clone())).await;
                        let next = json!({ "id": id, "type": "next", "payload": response });
                        if socket.send(Message::Text(next.to_string().into())).await.is_err() {
                            return;
                        }
                        let complete = json!({ "id": id, "type": "complete" });
                        if socket.send(Message::Text(complete.to_string().into())).await.is_err() {
                            return;
                        }
                        logger
                            .log(RequestLogEntry {
                                id: String::new(),
                                timestamp: chrono::Utc::now(),
                                protocol: Protocol::GraphQl,
                                method: "SUBSCRIBE".to_string(),
                                path: path.clone(),
                                query: String::new(),
                                headers: HashMap::new(),
                                body: Some(query),
                                remote_addr: None,
                                matched_mock_id: String::new(),
                                status: 200,
                                duration_ms: start.elapsed().as_millis() as u64,
                                detail: Some(ProtocolDetail {
                                    graphql_op_type: Some("subscription".to_string()),
                                    connection_id: Some(connection_id.clone()),
                                    ..Default::default()
                                }),
                                near_misses: Vec::new(),
                            })
                            .await;
                    }
                    "complete" => return,
                    other => warn!(frame_type = other, "unrecognized graphql-transport-ws frame"),
                }
            }
        }
    }
}
