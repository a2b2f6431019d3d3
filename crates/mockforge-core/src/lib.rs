//! Core mock store, matcher, logger, and data model for the mockd engine.
//!
//! This crate holds everything the engine's protocol front ends (HTTP,
//! gRPC, MQTT, GraphQL, WebSocket, SOAP, OAuth) share: the [`Mock`] data
//! model, the concurrent [`MockStore`] and its [`FilteredMockStore`]
//! workspace view, the scoring [`matcher`], the bounded [`RequestLogger`],
//! response [`template`] expansion, request-body [`validation`], and the
//! in-memory [`stateful`] resource bridge. Protocol lifecycle, HTTP
//! dispatch, and the management API live in `mockforge-http` and the
//! per-protocol crates, built on top of this one.

mod config;
mod error;
mod logger;
mod matcher;
mod mock;
mod protocol;
mod stateful;
pub mod store;
mod template;
mod validation;

pub use config::{
    ClientAuthMode, GraphQlConfig, GrpcConfig, MqttConfig, OAuthConfig, ServerConfiguration,
    SoapConfig, TlsConfig,
};
pub use error::{Error, Result};
pub use logger::{
    LogFilter, Protocol, ProtocolDetail, RequestLogEntry, RequestLogger, SubscriptionId,
};
pub use matcher::{collect_near_misses, select_best_match, MatchOutcome, MatchRequest, NearMiss};
pub use mock::{
    ChunkedSpec, GraphQlSpec, GrpcSpec, HttpMatcher, HttpResponse, HttpSpec, Mock, MockSpec,
    MockType, MqttSpec, OAuthSpec, SoapSpec, SseSpec, StatefulOperationSpec, ValidationMode,
    ValidationSpec, WebSocketSpec,
};
pub use protocol::PortBindingServer;
pub use stateful::{StatefulError, StatefulOp, StatefulStore};
pub use store::{FilteredMockStore, MockStore};
pub use template::TemplateContext;
pub use validation::{validate, ValidationOutcome};

/// Generate a fresh mock ID, used by the mock manager when `Add` is called
/// without one.
pub fn generate_mock_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
