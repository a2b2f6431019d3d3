//! Generic scripted-WebSocket [`RouteHandler`]: after upgrade, sends each
//! of a mock's configured messages at a fixed interval (template-expanded),
//! echoes anything the client sends meanwhile, and closes once the script
//! is exhausted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use mockforge_core::{Protocol, ProtocolDetail, RequestLogEntry, RequestLogger, TemplateContext};
use tracing::debug;

use mockforge_http::RouteHandler;

const SCRIPT_INTERVAL: Duration = Duration::from_millis(200);

/// Serves one mock's `<path>` WebSocket upgrade, per [`mockforge_core::WebSocketSpec`].
pub struct GenericWsHandler {
    messages: Vec<String>,
    logger: RequestLogger,
}

impl GenericWsHandler {
    /// Build a handler that plays back `messages` in order after upgrade.
    pub fn new(messages: Vec<String>, logger: RequestLogger) -> Self {
        Self { messages, logger }
    }
}

#[async_trait]
impl RouteHandler for GenericWsHandler {
    async fn handle(&self, req: Request<Body>) -> Response {
        let path = req.uri().path().to_string();
        let Ok(upgrade) = WebSocketUpgrade::from_request(req, &()).await else {
            return axum::http::StatusCode::BAD_REQUEST.into_response();
        };
        let messages = self.messages.clone();
        let logger = self.logger.clone();
        upgrade.on_upgrade(move |socket| run_script(socket, messages, logger, path))
    }
}

async fn run_script(mut socket: WebSocket, messages: Vec<String>, logger: RequestLogger, path: String) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let mut interval = tokio::time::interval(SCRIPT_INTERVAL);
    let mut index = 0usize;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if index >= messages.len() {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
                let start = Instant::now();
                let expanded = expand(&messages[index]);
                index += 1;
                if socket.send(Message::Text(expanded.clone().into())).await.is_err() {
                    return;
                }
                log_frame(&logger, &path, &connection_id, "SEND", expanded, start).await;
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        debug!(%text, "echoing client websocket message");
                        let start = Instant::now();
                        let text = text.to_string();
                        if socket.send(Message::Text(text.clone().into())).await.is_err() {
                            return;
                        }
                        log_frame(&logger, &path, &connection_id, "ECHO", text, start).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(_)) => return,
                    _ => {}
                }
            }
        }
    }
}

async fn log_frame(logger: &RequestLogger, path: &str, connection_id: &str, method: &str, body: String, start: Instant) {
    logger
        .log(RequestLogEntry {
            id: String::new(),
            timestamp: chrono::Utc::now(),
            protocol: Protocol::WebSocket,
            method: method.to_string(),
            path: path.to_string(),
            query: String::new(),
            headers: HashMap::new(),
            body: Some(body),
            remote_addr: None,
            matched_mock_id: path.to_string(),
            status: 0,
            duration_ms: start.elapsed().as_millis() as u64,
            detail: Some(ProtocolDetail { connection_id: Some(connection_id.to_string()), ..Default::default() }),
            near_misses: Vec::new(),
        })
        .await;
}

fn expand(message: &str) -> String {
    let ctx = TemplateContext::new(
        "WS".to_string(),
        String::new(),
        String::new(),
        Default::default(),
        None,
        Default::default(),
        None,
        None,
    );
    ctx.expand(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_faker_tags_in_scripted_messages() {
        let rendered = expand("id={{faker.uuid}}");
        assert!(rendered.starts_with("id="));
        assert_ne!(rendered, "id={{faker.uuid}}");
    }

    #[test]
    fn leaves_unresolvable_tags_untouched() {
        assert_eq!(expand("hello {{nope}}"), "hello {{nope}}");
    }
}
