//! Server-wide configuration: the input to [`crate::ServerConfiguration`]-
//! shaped construction of the engine, deserialized from YAML or JSON.

use serde::{Deserialize, Serialize};

/// One of the five mutual-TLS client authentication modes a `[[https.mtls]]`
/// section may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMode {
    /// No client certificate requested
    None,
    /// Requested but not required; failures don't abort the handshake
    Optional,
    /// Requested; failures abort the handshake
    Required,
    /// Required, and additionally checked against `allowed_cns`
    RequiredAndVerifyCn,
    /// Required, and additionally checked against `allowed_ous`
    RequiredAndVerifyOu,
}

impl Default for ClientAuthMode {
    fn default() -> Self {
        Self::None
    }
}

/// TLS configuration for the HTTPS listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Generate a self-signed certificate at startup instead of loading files
    pub auto_generate: bool,
    /// PEM certificate chain path, when not auto-generating
    pub cert_path: Option<String>,
    /// PEM private key path, when not auto-generating
    pub key_path: Option<String>,
    /// Client certificate auth mode
    pub client_auth: ClientAuthMode,
    /// Common names allowed under `required_and_verify_cn`
    pub allowed_cns: Vec<String>,
    /// Organizational units allowed under `required_and_verify_ou`
    pub allowed_ous: Vec<String>,
}

/// One GraphQL mock endpoint declaration at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQlConfig {
    /// Whether this endpoint is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// HTTP path the schema is served under
    pub path: String,
    /// Inline SDL
    #[serde(default)]
    pub schema: Option<String>,
    /// Path to a schema file
    #[serde(default)]
    pub schema_file: Option<String>,
    /// Whether to also register `<path>/ws` for subscriptions
    #[serde(default)]
    pub subscriptions_enabled: bool,
}

/// One OAuth/OIDC provider declaration at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Whether this provider is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// URL path prefix the seven well-known routes mount under
    pub issuer_path: String,
    /// HMAC signing secret for issued tokens
    pub signing_secret: String,
    /// Access token lifetime, in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

/// One SOAP handler declaration at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapConfig {
    /// Whether this handler is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// HTTP path the handler is registered under
    pub path: String,
    /// Operation name -> XML response body template
    #[serde(default)]
    pub operations: std::collections::HashMap<String, String>,
    /// Optional WSDL document served for introspection
    #[serde(default)]
    pub wsdl: Option<String>,
}

/// One gRPC server declaration at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcConfig {
    /// Whether this server is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// TCP port to bind
    pub port: u16,
    /// Directory containing `.proto` files
    #[serde(default)]
    pub proto_dir: Option<String>,
    /// Import search paths for proto compilation
    #[serde(default)]
    pub import_paths: Vec<String>,
}

/// One MQTT broker declaration at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Whether this broker is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// TCP port to bind
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_token_ttl() -> u64 {
    3600
}

fn default_management_port() -> u16 {
    0
}

fn default_max_log_entries() -> usize {
    1000
}

fn default_workspace_poll_interval_secs() -> u64 {
    10
}

/// Top-level engine configuration, the external collaborator's output from
/// parsing a YAML/JSON config file (config-file parsing and I/O are
/// themselves out of this crate's scope; this struct is its target shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfiguration {
    /// Plain HTTP listener port; 0 disables it
    pub http_port: u16,
    /// HTTPS listener port; 0 disables it
    pub https_port: u16,
    /// Management/control API port; 0 means "pick the first free port
    /// starting at 4281"
    #[serde(default = "default_management_port")]
    pub management_port: u16,
    /// Request logger ring capacity
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
    /// Base directory `bodyFile` paths are resolved against
    pub base_dir: String,
    /// TLS configuration for the HTTPS listener
    #[serde(default)]
    pub tls: TlsConfig,
    /// GraphQL endpoints to start
    #[serde(default)]
    pub graphql: Vec<GraphQlConfig>,
    /// OAuth providers to start
    #[serde(default)]
    pub oauth: Vec<OAuthConfig>,
    /// SOAP handlers to start
    #[serde(default)]
    pub soap: Vec<SoapConfig>,
    /// gRPC servers to start
    #[serde(default)]
    pub grpc: Vec<GrpcConfig>,
    /// MQTT brokers to start
    #[serde(default)]
    pub mqtt: Vec<MqttConfig>,
    /// Workspace admin polling interval, in seconds
    #[serde(default = "default_workspace_poll_interval_secs")]
    pub workspace_poll_interval_secs: u64,
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self {
            http_port: 3000,
            https_port: 0,
            management_port: default_management_port(),
            max_log_entries: default_max_log_entries(),
            base_dir: ".".to_string(),
            tls: TlsConfig::default(),
            graphql: Vec::new(),
            oauth: Vec::new(),
            soap: Vec::new(),
            grpc: Vec::new(),
            mqtt: Vec::new(),
            workspace_poll_interval_secs: default_workspace_poll_interval_secs(),
        }
    }
}

impl ServerConfiguration {
    /// Parse from a YAML document.
    pub fn from_yaml(s: &str) -> crate::Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Parse from a JSON document.
    pub fn from_json(s: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ServerConfiguration::default();
        assert_eq!(cfg.http_port, 3000);
        assert_eq!(cfg.max_log_entries, 1000);
        assert_eq!(cfg.management_port, 0);
    }

    #[test]
    fn yaml_roundtrip_fills_defaults() {
        let cfg = ServerConfiguration::from_yaml("httpPort: 0\nbaseDir: \"/tmp\"\n").unwrap();
        assert_eq!(cfg.base_dir, "/tmp");
        assert_eq!(cfg.max_log_entries, 1000);
    }
}
