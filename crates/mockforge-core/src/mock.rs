//! The mock data model: [`Mock`] and its per-protocol sub-records.
//!
//! A [`Mock`] is a tagged variant: exactly one of its per-type sub-records
//! is populated, matching its [`MockType`] discriminant. The discriminated
//! union is modeled as a Rust enum ([`MockSpec`]) so the invariant is
//! enforced by the type system rather than by convention.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Discriminates which per-protocol sub-record of a [`Mock`] is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockType {
    /// Plain HTTP request/response mock
    Http,
    /// GraphQL query/mutation/subscription mock
    GraphQl,
    /// gRPC service mock (port-binding)
    Grpc,
    /// MQTT broker mock (port-binding)
    Mqtt,
    /// Generic WebSocket upgrade mock
    WebSocket,
    /// SOAP operation mock
    Soap,
    /// OAuth/OIDC provider mock
    OAuth,
    /// HTTP mock whose response streams as Server-Sent Events
    Sse,
}

impl std::fmt::Display for MockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Http => "http",
            Self::GraphQl => "graphql",
            Self::Grpc => "grpc",
            Self::Mqtt => "mqtt",
            Self::WebSocket => "websocket",
            Self::Soap => "soap",
            Self::OAuth => "oauth",
            Self::Sse => "sse",
        };
        f.write_str(s)
    }
}

impl MockType {
    /// Whether this type requires exclusive use of a TCP port, as
    /// opposed to sharing the HTTP listener via a path-keyed route table.
    pub fn is_port_binding(self) -> bool {
        matches!(self, Self::Grpc | Self::Mqtt)
    }
}

/// A single configuration record mapping a request pattern to a scripted
/// response, tagged by protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mock {
    /// Unique identifier within its store. Defaults to empty, meaning "not
    /// yet assigned"; the mock manager generates one on `Add` when empty.
    #[serde(default)]
    pub id: String,
    /// Human-readable name, surfaced in near-miss reports
    #[serde(default)]
    pub name: Option<String>,
    /// Tri-state enabled flag: `None` means "enabled by default"
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Wall-clock creation time. Defaults to now if omitted on input; the
    /// mock manager always stamps this itself on `Add`.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Wall-clock last-update time, always >= `created_at`. Defaults to
    /// now if omitted; the mock manager always stamps this itself.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Owning workspace, or `None` for the global store
    #[serde(default)]
    pub workspace_id: Option<String>,
    /// The exactly-one populated per-protocol sub-record
    pub spec: MockSpec,
}

impl Mock {
    /// Whether the mock is currently active (tri-state `enabled` defaults true)
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// The [`MockType`] discriminant of this mock's populated sub-record
    pub fn mock_type(&self) -> MockType {
        self.spec.mock_type()
    }

    /// Priority for list ordering: HTTP mocks carry an explicit priority,
    /// all other mock types have implicit priority 0.
    pub fn priority(&self) -> i32 {
        match &self.spec {
            MockSpec::Http(h) => h.priority,
            _ => 0,
        }
    }

    /// Validate cross-field invariants and compile any regex fields.
    /// Called by the mock manager on Add/Update before the mock is stored.
    pub fn validate_and_prepare(&mut self) -> Result<()> {
        if self.updated_at < self.created_at {
            return Err(Error::validation("updated_at precedes created_at"));
        }
        match &mut self.spec {
            MockSpec::Http(h) => h.validate_and_prepare(),
            MockSpec::GraphQl(g) => g.validate(),
            MockSpec::Grpc(g) => g.validate(),
            MockSpec::Mqtt(m) => m.validate(),
            MockSpec::WebSocket(w) => w.validate(),
            MockSpec::Soap(s) => s.validate(),
            MockSpec::OAuth(o) => o.validate(),
        }
    }
}

/// The discriminated union of per-protocol mock bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MockSpec {
    /// HTTP mock (also covers the `Sse` mock type via `response.sse`)
    Http(HttpSpec),
    /// GraphQL mock
    GraphQl(GraphQlSpec),
    /// gRPC mock
    Grpc(GrpcSpec),
    /// MQTT mock
    Mqtt(MqttSpec),
    /// WebSocket mock
    WebSocket(WebSocketSpec),
    /// SOAP mock
    Soap(SoapSpec),
    /// OAuth mock
    OAuth(OAuthSpec),
}

impl MockSpec {
    /// The [`MockType`] this sub-record represents
    pub fn mock_type(&self) -> MockType {
        match self {
            Self::Http(h) if h.response.sse.is_some() => MockType::Sse,
            Self::Http(_) => MockType::Http,
            Self::GraphQl(_) => MockType::GraphQl,
            Self::Grpc(_) => MockType::Grpc,
            Self::Mqtt(_) => MockType::Mqtt,
            Self::WebSocket(_) => MockType::WebSocket,
            Self::Soap(_) => MockType::Soap,
            Self::OAuth(_) => MockType::OAuth,
        }
    }
}

/// The central HTTP mock case: priority, matcher, and response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSpec {
    /// Higher wins ties in the matcher
    #[serde(default)]
    pub priority: i32,
    /// The matching criteria block
    #[serde(default)]
    pub matcher: HttpMatcher,
    /// The scripted response
    pub response: HttpResponse,
}

impl HttpSpec {
    fn validate_and_prepare(&mut self) -> Result<()> {
        self.matcher.validate_and_compile()
    }
}

/// Matching criteria for an [`HttpSpec`]. Every field is optional; an absent
/// field contributes nothing to the score.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HttpMatcher {
    /// Case-insensitive exact method match
    #[serde(default)]
    pub method: Option<String>,
    /// Exact path, or path with `{name}` segments, or a `*` suffix wildcard
    #[serde(default)]
    pub path: Option<String>,
    /// Anchored regex path match with optional named captures. Mutually
    /// exclusive with `path`
    #[serde(default)]
    pub path_pattern: Option<String>,
    /// Required headers: name (case-insensitive) -> expected value
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Required query params: name -> expected value
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    /// Required substring of the request body
    #[serde(default)]
    pub body_contains: Option<String>,
    /// Required exact body match
    #[serde(default)]
    pub body_equals: Option<String>,
    /// Required body regex match
    #[serde(default)]
    pub body_pattern: Option<String>,

    #[serde(skip)]
    compiled_path_pattern: Option<Regex>,
    #[serde(skip)]
    compiled_body_pattern: Option<Regex>,
}

impl HttpMatcher {
    /// Validate cross-field exclusivity and compile regex fields.
    pub fn validate_and_compile(&mut self) -> Result<()> {
        if self.path.is_some() && self.path_pattern.is_some() {
            return Err(Error::validation(
                "matcher.path and matcher.pathPattern are mutually exclusive",
            ));
        }
        if let Some(pattern) = &self.path_pattern {
            let anchored = if pattern.starts_with('^') {
                pattern.clone()
            } else {
                format!("^{}", pattern)
            };
            self.compiled_path_pattern = Some(Regex::new(&anchored)?);
        }
        if let Some(pattern) = &self.body_pattern {
            self.compiled_body_pattern = Some(Regex::new(pattern)?);
        }
        Ok(())
    }

    /// The compiled path-pattern regex, if `path_pattern` was set and this
    /// matcher has been prepared via [`Self::validate_and_compile`].
    pub fn compiled_path_pattern(&self) -> Option<&Regex> {
        self.compiled_path_pattern.as_ref()
    }

    /// The compiled body-pattern regex, if `body_pattern` was set and this
    /// matcher has been prepared via [`Self::validate_and_compile`].
    pub fn compiled_body_pattern(&self) -> Option<&Regex> {
        self.compiled_body_pattern.as_ref()
    }
}

/// Validation mode for a mock's [`ValidationSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Reject any schema violation
    Strict,
    /// Reject only when a required field is missing
    Permissive,
    /// Never reject; log a warning
    Warn,
}

/// Request-body validation attached to a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSpec {
    /// How strictly to enforce `schema`
    pub mode: ValidationMode,
    /// JSON Schema the request body must satisfy
    pub schema: serde_json::Value,
    /// HTTP status to use on rejection (default 400)
    #[serde(default)]
    pub reject_status: Option<u16>,
}

/// A reference to a stateful-resource bridge operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatefulOperationSpec {
    /// Name of the stateful resource collection
    pub resource: String,
    /// Operation to perform: one of list/get/create/update/delete/patch
    pub operation: String,
    /// Template expanded to obtain the item ID for get/update/delete/patch
    /// (e.g. `{{params.id}}` for a mock registered at `/widgets/:id`).
    /// Ignored by list/create, which don't address a single item.
    #[serde(default)]
    pub id_from: Option<String>,
}

/// Server-Sent Events streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseSpec {
    /// Template expanded for each event's `data:` line
    pub event_template: String,
    /// Delay between events, in milliseconds
    #[serde(default = "default_sse_interval")]
    pub interval_ms: u64,
    /// Maximum number of events to emit; 0 means unlimited
    #[serde(default)]
    pub max_events: usize,
}

fn default_sse_interval() -> u64 {
    1000
}

/// Chunked-transfer streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkedSpec {
    /// Each entry is template-expanded and written as one chunk
    pub chunks: Vec<String>,
    /// Delay between chunks, in milliseconds
    #[serde(default)]
    pub interval_ms: u64,
}

/// The scripted response of an [`HttpSpec`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    /// HTTP status code to write
    pub status_code: u16,
    /// Header values, template-expandable
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Inline body (mutually exclusive with `body_file`)
    #[serde(default)]
    pub body: Option<String>,
    /// Path to a body file, resolved against the handler's `baseDir`
    #[serde(default)]
    pub body_file: Option<String>,
    /// Delay before responding, in milliseconds
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Deterministic RNG seed for template randomness
    #[serde(default)]
    pub seed: Option<u64>,
    /// Server-Sent Events streaming, if set
    #[serde(default)]
    pub sse: Option<SseSpec>,
    /// Chunked-transfer streaming, if set
    #[serde(default)]
    pub chunked: Option<ChunkedSpec>,
    /// Request-body validation, if set
    #[serde(default)]
    pub validation: Option<ValidationSpec>,
    /// Stateful bridge delegation, if set
    #[serde(default)]
    pub stateful_operation: Option<StatefulOperationSpec>,
}

/// GraphQL mock: a schema served (and optionally subscribable) at `path`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQlSpec {
    /// HTTP path this GraphQL endpoint is registered under
    pub path: String,
    /// Inline SDL, mutually exclusive with `schema_file`
    #[serde(default)]
    pub schema: Option<String>,
    /// Path to a `.graphql`/`.gql` schema file
    #[serde(default)]
    pub schema_file: Option<String>,
    /// Whether to also register a subscription handler under `<path>/ws`
    #[serde(default)]
    pub subscriptions_enabled: bool,
}

impl GraphQlSpec {
    fn validate(&self) -> Result<()> {
        if self.schema.is_none() && self.schema_file.is_none() {
            return Err(Error::validation("graphql mock requires schema or schema_file"));
        }
        Ok(())
    }
}

/// gRPC mock: a port-binding service built from proto files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcSpec {
    /// TCP port to bind
    pub port: u16,
    /// Directory containing `.proto` files
    #[serde(default)]
    pub proto_dir: Option<String>,
    /// Explicit list of `.proto` files (used together with `import_paths`)
    #[serde(default)]
    pub proto_files: Vec<String>,
    /// Import search paths for proto compilation
    #[serde(default)]
    pub import_paths: Vec<String>,
    /// Canned JSON response overrides, keyed by `"{fully-qualified service}/{method}"`.
    /// Fields present in the JSON object populate the matching output message
    /// field; fields the override omits keep their zero-valued default.
    #[serde(default)]
    pub responses: HashMap<String, serde_json::Value>,
}

impl GrpcSpec {
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::validation("grpc mock requires a non-zero port"));
        }
        Ok(())
    }
}

/// MQTT mock: a port-binding broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSpec {
    /// TCP port to bind
    pub port: u16,
    /// Topic this mock's auto-publish / retained fixture applies to
    #[serde(default)]
    pub topic: Option<String>,
    /// Fixture payload published on matching topics
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl MqttSpec {
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::validation("mqtt mock requires a non-zero port"));
        }
        Ok(())
    }
}

/// Generic WebSocket upgrade mock, registered on the shared HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketSpec {
    /// HTTP path this WS endpoint upgrades from
    pub path: String,
    /// Scripted messages sent to the client after upgrade, in order
    #[serde(default)]
    pub messages: Vec<String>,
}

impl WebSocketSpec {
    fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::validation("websocket mock requires a path"));
        }
        Ok(())
    }
}

/// SOAP mock, registered on the shared HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapSpec {
    /// HTTP path this SOAP endpoint is registered under
    pub path: String,
    /// Operation name -> XML response body template
    #[serde(default)]
    pub operations: HashMap<String, String>,
    /// Optional WSDL document served for introspection
    #[serde(default)]
    pub wsdl: Option<String>,
}

impl SoapSpec {
    fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::validation("soap mock requires a path"));
        }
        Ok(())
    }
}

/// OAuth/OIDC provider mock, registered on the shared HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSpec {
    /// URL path prefix the seven well-known OIDC routes are mounted under
    pub issuer_path: String,
    /// HMAC signing secret for issued tokens
    pub signing_secret: String,
    /// Access token lifetime, in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl() -> u64 {
    3600
}

impl OAuthSpec {
    fn validate(&self) -> Result<()> {
        if self.issuer_path.is_empty() {
            return Err(Error::validation("oauth mock requires issuer_path"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_http(priority: i32) -> Mock {
        let now = Utc::now();
        Mock {
            id: "m1".into(),
            name: None,
            enabled: None,
            created_at: now,
            updated_at: now,
            workspace_id: None,
            spec: MockSpec::Http(HttpSpec {
                priority,
                matcher: HttpMatcher::default(),
                response: HttpResponse {
                    status_code: 200,
                    headers: HashMap::new(),
                    body: Some("ok".into()),
                    body_file: None,
                    delay_ms: None,
                    seed: None,
                    sse: None,
                    chunked: None,
                    validation: None,
                    stateful_operation: None,
                },
            }),
        }
    }

    #[test]
    fn enabled_defaults_true_when_unset() {
        let m = base_http(0);
        assert!(m.is_enabled());
    }

    #[test]
    fn path_and_path_pattern_are_mutually_exclusive() {
        let mut m = base_http(1);
        if let MockSpec::Http(h) = &mut m.spec {
            h.matcher.path = Some("/a".into());
            h.matcher.path_pattern = Some("^/a$".into());
        }
        assert!(m.validate_and_prepare().is_err());
    }

    #[test]
    fn malformed_regex_is_a_validation_error() {
        let mut m = base_http(1);
        if let MockSpec::Http(h) = &mut m.spec {
            h.matcher.path_pattern = Some("(unclosed".into());
        }
        assert!(m.validate_and_prepare().is_err());
    }

    #[test]
    fn sse_response_reports_as_sse_type() {
        let mut m = base_http(0);
        if let MockSpec::Http(h) = &mut m.spec {
            h.response.sse = Some(SseSpec {
                event_template: "{{now}}".into(),
                interval_ms: 100,
                max_events: 1,
            });
        }
        assert_eq!(m.mock_type(), MockType::Sse);
    }

    #[test]
    fn non_http_mocks_have_implicit_zero_priority() {
        let now = Utc::now();
        let m = Mock {
            id: "m2".into(),
            name: None,
            enabled: None,
            created_at: now,
            updated_at: now,
            workspace_id: None,
            spec: MockSpec::Mqtt(MqttSpec {
                port: 1883,
                topic: None,
                payload: None,
            }),
        };
        assert_eq!(m.priority(), 0);
    }
}
