//! Generic unary dispatch: routes every `/{package.Service}/{Method}`
//! request against the compiled descriptor pool and answers with a
//! default-valued instance of the declared output message, or a
//! canned JSON-sourced override when the mock configuration supplies one.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use mockforge_core::{Protocol, ProtocolDetail, RequestLogEntry, RequestLogger};
use prost_reflect::DynamicMessage;
use tonic::server::{Grpc, UnaryService};
use tonic::Status;
use tracing::{debug, warn};

use crate::codec::DynamicCodec;
use crate::descriptor::CompiledService;

struct DefaultResponder {
    output: prost_reflect::MessageDescriptor,
    override_value: Option<serde_json::Value>,
}

impl UnaryService<DynamicMessage> for DefaultResponder {
    type Response = DynamicMessage;
    type Future = Pin<Box<dyn Future<Output = Result<tonic::Response<Self::Response>, Status>> + Send>>;

    fn call(&mut self, request: tonic::Request<DynamicMessage>) -> Self::Future {
        let output = self.output.clone();
        let override_value = self.override_value.clone();
        Box::pin(async move {
            debug!(message = ?request.get_ref(), "received dynamic grpc request");
            let message = match override_value {
                Some(value) => DynamicMessage::deserialize(output.clone(), value).unwrap_or_else(|e| {
                    warn!(error = %e, "gRPC response override does not match output message; falling back to default");
                    DynamicMessage::new(output)
                }),
                None => DynamicMessage::new(output),
            };
            Ok(tonic::Response::new(message))
        })
    }
}

/// Shared dispatch state: the services compiled out of a single mock's
/// proto set, keyed by their fully-qualified name, plus any canned JSON
/// response overrides keyed by `"{service}/{method}"`.
pub struct DispatchState {
    mock_id: String,
    services: HashMap<String, CompiledService>,
    responses: HashMap<String, serde_json::Value>,
    logger: RequestLogger,
}

impl DispatchState {
    pub fn new(
        mock_id: String,
        services: Vec<CompiledService>,
        responses: HashMap<String, serde_json::Value>,
        logger: RequestLogger,
    ) -> Self {
        Self {
            mock_id,
            services: services.into_iter().map(|s| (s.full_name.clone(), s)).collect(),
            responses,
            logger,
        }
    }
}

/// Build the `axum` router that serves every method of every compiled
/// service generically over gRPC framing.
pub fn router(state: Arc<DispatchState>) -> Router {
    Router::new().fallback(any(handle)).with_state(state)
}

fn status_response(status: Status) -> Response {
    let (parts, body) = status.to_http().into_parts();
    Response::from_parts(parts, Body::new(body))
}

async fn handle(State(state): State<Arc<DispatchState>>, req: Request<Body>) -> Response {
    let start = std::time::Instant::now();
    let path = req.uri().path().to_string();
    let mut segments = path.trim_start_matches('/').splitn(2, '/');
    let (Some(service_name), Some(method_name)) = (segments.next(), segments.next()) else {
        return status_response(Status::unimplemented("not a grpc path"));
    };
    let service_name = service_name.to_string();
    let method_name = method_name.to_string();

    let Some(service) = state.services.get(&service_name) else {
        warn!(service = %service_name, "no such grpc service registered");
        return status_response(Status::unimplemented(format!("unknown service {service_name}")));
    };
    let Some(method) = service.method(&method_name) else {
        warn!(service = %service_name, method = %method_name, "no such grpc method registered");
        return status_response(Status::unimplemented(format!("unknown method {method_name}")));
    };

    if method.is_client_streaming() || method.is_server_streaming() {
        warn!(
            service = %service_name,
            method = %method_name,
            "streaming methods are served with unimplemented (unary-only mock)"
        );
        return status_response(Status::unimplemented("streaming rpcs are not mocked"));
    }

    let override_key = format!("{service_name}/{method_name}");
    let override_value = state.responses.get(&override_key).cloned();
    let codec = DynamicCodec::new(method.input(), method.output());
    let responder = DefaultResponder { output: method.output(), override_value };

    let (parts, body) = req.into_parts();
    let http_req = axum::http::Request::from_parts(parts, tonic::body::boxed(body));
    let response = Grpc::new(codec).unary(responder, http_req).await;
    let (resp_parts, resp_body) = response.into_parts();
    let status = resp_parts.status.as_u16();
    let resp = Response::from_parts(resp_parts, Body::new(resp_body));

    state
        .logger
        .log(RequestLogEntry {
            id: String::new(),
            timestamp: chrono::Utc::now(),
            protocol: Protocol::Grpc,
            method: "POST".to_string(),
            path,
            query: String::new(),
            headers: HashMap::new(),
            body: None,
            remote_addr: None,
            matched_mock_id: format!("{}:{}", state.mock_id, override_key),
            status,
            duration_ms: start.elapsed().as_millis() as u64,
            detail: Some(ProtocolDetail {
                grpc_service: Some(service_name),
                ..Default::default()
            }),
            near_misses: Vec::new(),
        })
        .await;

    resp
}
