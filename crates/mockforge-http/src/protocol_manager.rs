//! The protocol manager: lifecycle of port-binding protocol instances
//! (gRPC servers, MQTT brokers) and registration of route-sharing handlers
//! (WebSocket, GraphQL, SOAP, OAuth) onto the shared [`HttpHandler`].
//!
//! To keep `mockforge-http` free of a dependency on any concrete protocol
//! crate, each protocol is represented here only by a small factory trait.
//! The protocol crates (`mockforge-grpc`, `mockforge-mqtt`, `mockforge-ws`,
//! `mockforge-graphql`, `mockforge-soap`, `mockforge-oauth`) already depend
//! on this crate for [`RouteHandler`]/[`PortBindingServer`], so it is each
//! protocol crate — not `mockforge-cli` — that implements the matching
//! factory trait below.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use mockforge_core::{
    Error, GraphQlSpec, GrpcSpec, MqttSpec, OAuthSpec, PortBindingServer, RequestLogger, Result,
    ServerConfiguration, SoapSpec, WebSocketSpec,
};

use crate::handler::HttpHandler;
use crate::route_handler::RouteHandler;

/// Builds a gRPC server instance for a mock's [`GrpcSpec`].
#[async_trait]
pub trait GrpcFactory: Send + Sync {
    /// Compile the mock's proto files and start a server bound to its port,
    /// logging dispatched calls through `logger`.
    async fn start(&self, mock_id: &str, spec: &GrpcSpec, logger: RequestLogger) -> Result<Arc<dyn PortBindingServer>>;
}

/// Builds an MQTT broker instance for a mock's [`MqttSpec`].
#[async_trait]
pub trait MqttFactory: Send + Sync {
    /// Start a broker bound to the mock's port, logging publishes through
    /// `logger`.
    async fn start(&self, mock_id: &str, spec: &MqttSpec, logger: RequestLogger) -> Result<Arc<dyn PortBindingServer>>;
}

/// Builds query/mutation and (optionally) subscription route handlers for a
/// mock's [`GraphQlSpec`].
#[async_trait]
pub trait GraphQlFactory: Send + Sync {
    /// Parse the schema and build the query/mutation handler.
    async fn build_query(&self, spec: &GraphQlSpec, logger: RequestLogger) -> Result<Arc<dyn RouteHandler>>;
    /// Parse the schema and build the subscription handler. `shutdown` is
    /// subscribed to by each upgraded connection so a server-wide stop can
    /// broadcast a close reason to every open subscription.
    async fn build_subscription(
        &self,
        spec: &GraphQlSpec,
        logger: RequestLogger,
        shutdown: broadcast::Sender<String>,
    ) -> Result<Arc<dyn RouteHandler>>;
}

/// Builds the seven OIDC route handlers for a mock's [`OAuthSpec`].
#[async_trait]
pub trait OAuthFactory: Send + Sync {
    /// Build the combined handler serving all seven well-known routes.
    async fn build(&self, spec: &OAuthSpec, logger: RequestLogger) -> Result<Arc<dyn RouteHandler>>;
}

/// Builds a SOAP operation-dispatch handler for a mock's [`SoapSpec`].
#[async_trait]
pub trait SoapFactory: Send + Sync {
    /// Build the handler.
    async fn build(&self, spec: &SoapSpec, logger: RequestLogger) -> Result<Arc<dyn RouteHandler>>;
}

/// Builds a generic scripted-WebSocket handler for a mock's [`WebSocketSpec`].
#[async_trait]
pub trait WsFactory: Send + Sync {
    /// Build the handler.
    async fn build(&self, spec: &WebSocketSpec, logger: RequestLogger) -> Result<Arc<dyn RouteHandler>>;
}

/// The optional set of protocol factories a server is constructed
/// with. Any factory left `None` means that protocol's mocks are kept
/// dormant and logged rather than causing a panic.
#[derive(Default, Clone)]
pub struct ProtocolFactories {
    /// gRPC server factory
    pub grpc: Option<Arc<dyn GrpcFactory>>,
    /// MQTT broker factory
    pub mqtt: Option<Arc<dyn MqttFactory>>,
    /// GraphQL handler factory
    pub graphql: Option<Arc<dyn GraphQlFactory>>,
    /// OAuth provider factory
    pub oauth: Option<Arc<dyn OAuthFactory>>,
    /// SOAP handler factory
    pub soap: Option<Arc<dyn SoapFactory>>,
    /// Generic WebSocket handler factory
    pub ws: Option<Arc<dyn WsFactory>>,
}

#[derive(Default)]
struct Registry {
    grpc: HashMap<String, Arc<dyn PortBindingServer>>,
    mqtt: HashMap<String, Arc<dyn PortBindingServer>>,
    /// IDs of enabled port-binding mocks whose sub-record is missing
    /// required inputs; holds no running instance but is not rejected.
    grpc_dormant: std::collections::HashSet<String>,
    mqtt_dormant: std::collections::HashSet<String>,
}

/// Per-protocol running-instance status, surfaced by `GET /protocols`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProtocolStatus {
    /// Protocol name (`grpc`, `mqtt`, `graphql`, `oauth`, `soap`, `websocket`)
    pub protocol: String,
    /// Number of currently running/registered instances
    pub instance_count: usize,
    /// Enabled mocks for this protocol holding no running instance because
    /// their sub-record was missing required inputs (dormant, not failed)
    pub dormant_count: usize,
}

/// Maintains the port-binding instance registry and drives route-sharing
/// handler (un)registration on the shared [`HttpHandler`].
pub struct ProtocolManager {
    factories: ProtocolFactories,
    registry: Mutex<Registry>,
    logger: RequestLogger,
}

impl ProtocolManager {
    /// Construct a protocol manager with the given factories, sharing `logger`
    /// with every protocol instance it starts or registers.
    pub fn new(factories: ProtocolFactories, logger: RequestLogger) -> Self {
        Self {
            factories,
            registry: Mutex::new(Registry::default()),
            logger,
        }
    }

    /// Start a gRPC server for `mock_id`/`spec`, refusing a port collision
    /// with a different mock ID, and returning the existing instance on
    /// same-ID re-entry. A factory failure reporting [`Error::Dormant`]
    /// (missing proto inputs) is recorded in the dormant set rather than
    /// treated as a startup failure.
    pub async fn start_grpc_server(&self, mock_id: &str, spec: &GrpcSpec) -> Result<()> {
        let mut reg = self.registry.lock().await;
        if let Some(existing) = reg.grpc.get(mock_id) {
            if existing.port() == spec.port {
                return Ok(());
            }
        }
        if let Some((other_id, _)) = reg.grpc.iter().find(|(id, s)| *id != mock_id && s.port() == spec.port) {
            return Err(Error::PortBindFailure {
                message: format!("port {} already bound by gRPC instance {other_id}", spec.port),
            });
        }
        let Some(factory) = &self.factories.grpc else {
            warn!(mock_id, "no gRPC server factory configured; gRPC mock rejected");
            return Err(Error::PortBindFailure {
                message: "no gRPC server factory configured".into(),
            });
        };
        match factory.start(mock_id, spec, self.logger.clone()).await {
            Ok(server) => {
                reg.grpc_dormant.remove(mock_id);
                reg.grpc.insert(mock_id.to_string(), server);
                info!(mock_id, port = spec.port, "gRPC server started");
                Ok(())
            }
            Err(Error::Dormant { message }) => {
                reg.grpc_dormant.insert(mock_id.to_string());
                warn!(mock_id, %message, "gRPC mock missing required proto inputs; kept dormant");
                Err(Error::Dormant { message })
            }
            Err(e) => Err(e),
        }
    }

    /// Stop and remove the gRPC instance for `mock_id`, if any, and clear
    /// its dormant-tracking entry.
    pub async fn stop_grpc_server(&self, mock_id: &str, timeout: Duration) -> Result<()> {
        let server = {
            let mut reg = self.registry.lock().await;
            reg.grpc_dormant.remove(mock_id);
            reg.grpc.remove(mock_id)
        };
        if let Some(server) = server {
            server.stop(timeout).await?;
            info!(mock_id, "gRPC server stopped");
        }
        Ok(())
    }

    /// Start an MQTT broker for `mock_id`/`spec`, with the same same-port/
    /// same-ID rules as [`Self::start_grpc_server`].
    pub async fn start_mqtt_broker(&self, mock_id: &str, spec: &MqttSpec) -> Result<()> {
        let mut reg = self.registry.lock().await;
        if let Some(existing) = reg.mqtt.get(mock_id) {
            if existing.port() == spec.port {
                return Ok(());
            }
        }
        if let Some((other_id, _)) = reg.mqtt.iter().find(|(id, s)| *id != mock_id && s.port() == spec.port) {
            return Err(Error::PortBindFailure {
                message: format!("port {} already bound by MQTT broker {other_id}", spec.port),
            });
        }
        let Some(factory) = &self.factories.mqtt else {
            warn!(mock_id, "no MQTT broker factory configured; MQTT mock rejected");
            return Err(Error::PortBindFailure {
                message: "no MQTT broker factory configured".into(),
            });
        };
        match factory.start(mock_id, spec, self.logger.clone()).await {
            Ok(broker) => {
                reg.mqtt_dormant.remove(mock_id);
                reg.mqtt.insert(mock_id.to_string(), broker);
                info!(mock_id, port = spec.port, "MQTT broker started");
                Ok(())
            }
            Err(Error::Dormant { message }) => {
                reg.mqtt_dormant.insert(mock_id.to_string());
                warn!(mock_id, %message, "MQTT mock missing required inputs; kept dormant");
                Err(Error::Dormant { message })
            }
            Err(e) => Err(e),
        }
    }

    /// Stop and remove the MQTT broker for `mock_id`, if any, and clear its
    /// dormant-tracking entry.
    pub async fn stop_mqtt_broker(&self, mock_id: &str, timeout: Duration) -> Result<()> {
        let broker = {
            let mut reg = self.registry.lock().await;
            reg.mqtt_dormant.remove(mock_id);
            reg.mqtt.remove(mock_id)
        };
        if let Some(broker) = broker {
            broker.stop(timeout).await?;
            info!(mock_id, "MQTT broker stopped");
        }
        Ok(())
    }

    /// Build and register the GraphQL query (and, if enabled, subscription)
    /// handler for `mock_id`/`spec` on `http`.
    pub async fn register_graphql(&self, http: &HttpHandler, spec: &GraphQlSpec) -> Result<()> {
        let factory = self.factories.graphql.as_ref().ok_or_else(|| {
            Error::generic("no GraphQL handler factory configured")
        })?;
        let query = factory.build_query(spec, self.logger.clone()).await?;
        http.register_graphql(spec.path.clone(), query).await;
        if spec.subscriptions_enabled {
            let sub_path = if spec.path.ends_with('/') {
                format!("{}ws", spec.path)
            } else {
                format!("{}/ws", spec.path)
            };
            let subscription = factory
                .build_subscription(spec, self.logger.clone(), http.shutdown_sender())
                .await?;
            http.register_graphql_subscription(sub_path, subscription).await;
        }
        Ok(())
    }

    /// Unregister the GraphQL handler(s) for `spec`.
    pub async fn unregister_graphql(&self, http: &HttpHandler, spec: &GraphQlSpec) {
        let sub_path = if spec.path.ends_with('/') {
            format!("{}ws", spec.path)
        } else {
            format!("{}/ws", spec.path)
        };
        http.unregister_graphql(&spec.path, &sub_path).await;
    }

    /// Build and register the OAuth provider's routes on `http`.
    pub async fn register_oauth(&self, http: &HttpHandler, spec: &OAuthSpec) -> Result<()> {
        let factory = self
            .factories
            .oauth
            .as_ref()
            .ok_or_else(|| Error::generic("no OAuth provider factory configured"))?;
        let route = factory.build(spec, self.logger.clone()).await?;
        http.register_oauth(spec.issuer_path.clone(), route).await;
        Ok(())
    }

    /// Unregister the OAuth provider's routes for `spec`.
    pub async fn unregister_oauth(&self, http: &HttpHandler, spec: &OAuthSpec) {
        http.unregister_oauth(&spec.issuer_path).await;
    }

    /// Build and register the SOAP handler for `spec` on `http`.
    pub async fn register_soap(&self, http: &HttpHandler, spec: &SoapSpec) -> Result<()> {
        let factory = self.factories.soap.as_ref().ok_or_else(|| Error::generic("no SOAP handler factory configured"))?;
        let route = factory.build(spec, self.logger.clone()).await?;
        http.register_soap(spec.path.clone(), route).await;
        Ok(())
    }

    /// Unregister the SOAP handler for `spec`.
    pub async fn unregister_soap(&self, http: &HttpHandler, spec: &SoapSpec) {
        http.unregister_soap(&spec.path).await;
    }

    /// Build and register the generic WebSocket handler for `spec` on `http`.
    pub async fn register_ws(&self, http: &HttpHandler, spec: &WebSocketSpec) -> Result<()> {
        let factory = self.factories.ws.as_ref().ok_or_else(|| Error::generic("no WebSocket handler factory configured"))?;
        let route = factory.build(spec, self.logger.clone()).await?;
        http.register_ws(spec.path.clone(), route).await;
        Ok(())
    }

    /// Unregister the WebSocket handler for `spec`.
    pub async fn unregister_ws(&self, http: &HttpHandler, spec: &WebSocketSpec) {
        http.unregister_ws(&spec.path).await;
    }

    /// Bootstrap every protocol instance declared in `config`: GraphQL,
    /// OAuth and SOAP handlers register on `http`; gRPC servers and MQTT
    /// brokers bind their configured ports. Stops at the first failure and
    /// propagates it.
    pub async fn start_all(&self, http: &HttpHandler, config: &ServerConfiguration) -> Result<()> {
        for (i, cfg) in config.graphql.iter().enumerate().filter(|(_, c)| c.enabled) {
            let spec = GraphQlSpec {
                path: cfg.path.clone(),
                schema: cfg.schema.clone(),
                schema_file: cfg.schema_file.clone(),
                subscriptions_enabled: cfg.subscriptions_enabled,
            };
            self.register_graphql(http, &spec).await.map_err(|e| {
                Error::generic(format!("graphql config #{i} ({}): {e}", cfg.path))
            })?;
        }
        for (i, cfg) in config.oauth.iter().enumerate().filter(|(_, c)| c.enabled) {
            let spec = OAuthSpec {
                issuer_path: cfg.issuer_path.clone(),
                signing_secret: cfg.signing_secret.clone(),
                token_ttl_secs: cfg.token_ttl_secs,
            };
            self.register_oauth(http, &spec).await.map_err(|e| {
                Error::generic(format!("oauth config #{i} ({}): {e}", cfg.issuer_path))
            })?;
        }
        for (i, cfg) in config.soap.iter().enumerate().filter(|(_, c)| c.enabled) {
            let spec = SoapSpec {
                path: cfg.path.clone(),
                operations: cfg.operations.clone(),
                wsdl: cfg.wsdl.clone(),
            };
            self.register_soap(http, &spec).await.map_err(|e| {
                Error::generic(format!("soap config #{i} ({}): {e}", cfg.path))
            })?;
        }
        for cfg in config.grpc.iter().filter(|c| c.enabled) {
            let id = format!("grpc-startup-{}", cfg.port);
            let spec = GrpcSpec {
                port: cfg.port,
                proto_dir: cfg.proto_dir.clone(),
                proto_files: Vec::new(),
                import_paths: cfg.import_paths.clone(),
                responses: HashMap::new(),
            };
            match self.start_grpc_server(&id, &spec).await {
                Ok(()) | Err(Error::Dormant { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        for cfg in config.mqtt.iter().filter(|c| c.enabled) {
            let id = format!("mqtt-startup-{}", cfg.port);
            let spec = MqttSpec { port: cfg.port, topic: None, payload: None };
            match self.start_mqtt_broker(&id, &spec).await {
                Ok(()) | Err(Error::Dormant { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Per-protocol running-instance and dormant-mock counts, surfaced by
    /// `GET /protocols`.
    pub async fn status(&self, http: &HttpHandler) -> Vec<ProtocolStatus> {
        let reg = self.registry.lock().await;
        vec![
            ProtocolStatus { protocol: "grpc".into(), instance_count: reg.grpc.len(), dormant_count: reg.grpc_dormant.len() },
            ProtocolStatus { protocol: "mqtt".into(), instance_count: reg.mqtt.len(), dormant_count: reg.mqtt_dormant.len() },
            ProtocolStatus { protocol: "graphql".into(), instance_count: http.graphql_route_count().await, dormant_count: 0 },
            ProtocolStatus { protocol: "oauth".into(), instance_count: http.oauth_route_count().await, dormant_count: 0 },
            ProtocolStatus { protocol: "soap".into(), instance_count: http.soap_route_count().await, dormant_count: 0 },
            ProtocolStatus { protocol: "websocket".into(), instance_count: http.ws_route_count().await, dormant_count: 0 },
        ]
    }

    /// Stop every running protocol instance and release every route-sharing
    /// registration on `http`. Order follows the four-step shutdown
    /// contract: (1) MQTT brokers, since they hold long-lived connections,
    /// (2) gRPC servers, (3) a close-reason broadcast to every open GraphQL
    /// subscription connection, (4) dropping the OAuth/GraphQL/SOAP handler
    /// references themselves.
    pub async fn stop_all(&self, http: &HttpHandler, timeout: Duration) -> Result<()> {
        let (mqtt_ids, grpc_ids): (Vec<String>, Vec<String>) = {
            let reg = self.registry.lock().await;
            (reg.mqtt.keys().cloned().collect(), reg.grpc.keys().cloned().collect())
        };
        let mut first_err = None;
        for id in mqtt_ids {
            if let Err(e) = self.stop_mqtt_broker(&id, timeout).await {
                first_err.get_or_insert(e);
            }
        }
        for id in grpc_ids {
            if let Err(e) = self.stop_grpc_server(&id, timeout).await {
                first_err.get_or_insert(e);
            }
        }
        http.broadcast_shutdown("server stopping");
        http.clear_graphql().await;
        http.clear_oauth().await;
        http.clear_soap().await;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DormantGrpcFactory;

    #[async_trait]
    impl GrpcFactory for DormantGrpcFactory {
        async fn start(&self, _mock_id: &str, _spec: &GrpcSpec, _logger: RequestLogger) -> Result<Arc<dyn PortBindingServer>> {
            Err(Error::dormant("no proto files configured"))
        }
    }

    fn test_http() -> HttpHandler {
        HttpHandler::new(
            crate::store_handle::StoreHandle::from(mockforge_core::MockStore::new()),
            RequestLogger::new(100),
            mockforge_core::StatefulStore::new(),
            ".",
        )
    }

    #[tokio::test]
    async fn grpc_start_without_factory_fails_and_leaves_registry_empty() {
        let manager = ProtocolManager::new(ProtocolFactories::default(), RequestLogger::new(100));
        let spec = GrpcSpec { port: 50051, proto_dir: None, proto_files: vec![], import_paths: vec![], responses: HashMap::new() };
        assert!(manager.start_grpc_server("m1", &spec).await.is_err());
    }

    #[tokio::test]
    async fn grpc_missing_proto_inputs_is_kept_dormant_not_rejected() {
        let factories = ProtocolFactories {
            grpc: Some(Arc::new(DormantGrpcFactory)),
            ..Default::default()
        };
        let manager = ProtocolManager::new(factories, RequestLogger::new(100));
        let spec = GrpcSpec { port: 50052, proto_dir: None, proto_files: vec![], import_paths: vec![], responses: HashMap::new() };
        let err = manager.start_grpc_server("m1", &spec).await.unwrap_err();
        assert!(matches!(err, Error::Dormant { .. }));

        let http = test_http();
        let statuses = manager.status(&http).await;
        let grpc_status = statuses.iter().find(|s| s.protocol == "grpc").unwrap();
        assert_eq!(grpc_status.instance_count, 0);
        assert_eq!(grpc_status.dormant_count, 1);
    }

    #[tokio::test]
    async fn stop_all_on_empty_registry_is_a_no_op() {
        let manager = ProtocolManager::new(ProtocolFactories::default(), RequestLogger::new(100));
        let http = test_http();
        assert!(manager.stop_all(&http, Duration::from_secs(1)).await.is_ok());
    }
}
