//! The mock manager: serializes `Add`/`Update`/`Delete`/`Clear` under a
//! single write lock so the store and protocol-handler registrations move
//! together.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, warn};

use mockforge_core::{generate_mock_id, Error, Mock, MockSpec, Result};

use crate::handler::HttpHandler;
use crate::protocol_manager::ProtocolManager;
use crate::store_handle::StoreHandle;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the store handle, the shared HTTP handler, and the protocol
/// manager, and drives all three together on every mutation.
pub struct MockManager {
    store: StoreHandle,
    http: Arc<HttpHandler>,
    protocols: Arc<ProtocolManager>,
    write_lock: Mutex<()>,
}

impl MockManager {
    /// Construct a manager over `store`, registering/unregistering protocol
    /// state on `http` through `protocols`.
    pub fn new(store: StoreHandle, http: Arc<HttpHandler>, protocols: Arc<ProtocolManager>) -> Self {
        Self {
            store,
            http,
            protocols,
            write_lock: Mutex::new(()),
        }
    }

    /// Register this mock's protocol-specific handler/instance. Returns an
    /// error only for port-binding types; route-sharing registration
    /// failures are logged and swallowed.
    async fn register_handler(&self, mock: &Mock) -> Result<()> {
        match &mock.spec {
            MockSpec::Http(_) => Ok(()),
            MockSpec::Grpc(spec) => self.protocols.start_grpc_server(&mock.id, spec).await,
            MockSpec::Mqtt(spec) => self.protocols.start_mqtt_broker(&mock.id, spec).await,
            MockSpec::GraphQl(spec) => {
                if let Err(e) = self.protocols.register_graphql(&self.http, spec).await {
                    warn!(mock_id = %mock.id, error = %e, "failed to register GraphQL handler");
                }
                Ok(())
            }
            MockSpec::OAuth(spec) => {
                if let Err(e) = self.protocols.register_oauth(&self.http, spec).await {
                    warn!(mock_id = %mock.id, error = %e, "failed to register OAuth handler");
                }
                Ok(())
            }
            MockSpec::Soap(spec) => {
                if let Err(e) = self.protocols.register_soap(&self.http, spec).await {
                    warn!(mock_id = %mock.id, error = %e, "failed to register SOAP handler");
                }
                Ok(())
            }
            MockSpec::WebSocket(spec) => {
                if let Err(e) = self.protocols.register_ws(&self.http, spec).await {
                    warn!(mock_id = %mock.id, error = %e, "failed to register WebSocket handler");
                }
                Ok(())
            }
        }
    }

    /// Tear down this mock's protocol-specific handler/instance.
    async fn unregister_handler(&self, mock: &Mock) {
        match &mock.spec {
            MockSpec::Http(_) => {}
            MockSpec::Grpc(_) => {
                if let Err(e) = self.protocols.stop_grpc_server(&mock.id, STOP_TIMEOUT).await {
                    error!(mock_id = %mock.id, error = %e, "failed to stop gRPC server");
                }
            }
            MockSpec::Mqtt(_) => {
                if let Err(e) = self.protocols.stop_mqtt_broker(&mock.id, STOP_TIMEOUT).await {
                    error!(mock_id = %mock.id, error = %e, "failed to stop MQTT broker");
                }
            }
            MockSpec::GraphQl(spec) => self.protocols.unregister_graphql(&self.http, spec).await,
            MockSpec::OAuth(spec) => self.protocols.unregister_oauth(&self.http, spec).await,
            MockSpec::Soap(spec) => self.protocols.unregister_soap(&self.http, spec).await,
            MockSpec::WebSocket(spec) => self.protocols.unregister_ws(&self.http, spec).await,
        }
    }

    /// Add a new mock: generate an ID if absent, stamp timestamps, default
    /// `enabled`, validate, reject duplicates, then store and register. On
    /// port-binding registration failure the store insert is rolled back,
    /// except when the failure is [`Error::Dormant`] — a mock missing
    /// required protocol inputs is kept enabled in the store with no
    /// running instance rather than rejected.
    pub async fn add(&self, mut mock: Mock) -> Result<Mock> {
        let _guard = self.write_lock.lock().await;

        if mock.id.is_empty() {
            mock.id = generate_mock_id();
        }
        if self.store.exists(&mock.id).await {
            return Err(Error::DuplicateId { id: mock.id });
        }
        let now = Utc::now();
        mock.created_at = now;
        mock.updated_at = now;
        if mock.enabled.is_none() {
            mock.enabled = Some(true);
        }
        mock.validate_and_prepare()?;

        self.store.set(mock.clone()).await;
        if let Err(e) = self.register_handler(&mock).await {
            if !matches!(e, Error::Dormant { .. }) {
                self.store.delete(&mock.id).await;
                return Err(e);
            }
            warn!(mock_id = %mock.id, error = %e, "mock kept enabled but dormant; missing required protocol inputs");
        }
        Ok(mock)
    }

    /// Update an existing mock by ID: preserve `id`/`created_at`, refresh
    /// `updated_at`, validate, unregister the old protocol state, store,
    /// then re-register.
    pub async fn update(&self, id: &str, mut mock: Mock) -> Result<Mock> {
        let _guard = self.write_lock.lock().await;

        let existing = self.store.get(id).await.ok_or_else(|| Error::NotFound { id: id.to_string() })?;
        mock.id = existing.id.clone();
        mock.created_at = existing.created_at;
        mock.updated_at = Utc::now();
        mock.validate_and_prepare()?;

        self.unregister_handler(&existing).await;
        self.store.set(mock.clone()).await;
        if let Err(e) = self.register_handler(&mock).await {
            warn!(mock_id = %mock.id, error = %e, "re-registration failed after update; protocol state left unregistered");
        }
        Ok(mock)
    }

    /// Flip a mock's `enabled` flag via a full `Update` — this re-registers
    /// protocol state even for a flag-only change.
    pub async fn toggle(&self, id: &str, enabled: bool) -> Result<Mock> {
        let _guard = self.write_lock.lock().await;
        let mut mock = self.store.get(id).await.ok_or_else(|| Error::NotFound { id: id.to_string() })?;
        let existing = mock.clone();
        mock.enabled = Some(enabled);
        mock.updated_at = Utc::now();

        self.unregister_handler(&existing).await;
        self.store.set(mock.clone()).await;
        if let Err(e) = self.register_handler(&mock).await {
            warn!(mock_id = %mock.id, error = %e, "re-registration failed after toggle; protocol state left unregistered");
        }
        Ok(mock)
    }

    /// Delete a mock by ID: unregister its protocol state, then remove it
    /// from the store.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mock) = self.store.get(id).await else {
            return Ok(false);
        };
        self.unregister_handler(&mock).await;
        Ok(self.store.delete(id).await)
    }

    /// Unregister and remove every mock.
    pub async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        for mock in self.store.list().await {
            self.unregister_handler(&mock).await;
        }
        self.store.clear().await;
    }

    /// Bulk-add mocks, optionally clearing the store first (management API
    /// `POST /deploy`). Stops at the first failure, returning mocks added
    /// so far alongside the error.
    pub async fn deploy(&self, mocks: Vec<Mock>, replace: bool) -> Result<Vec<Mock>> {
        if replace {
            self.clear().await;
        }
        let mut added = Vec::with_capacity(mocks.len());
        for mock in mocks {
            added.push(self.add(mock).await?);
        }
        Ok(added)
    }

    /// Fetch a mock by ID (read-path; uses the store's own concurrency
    /// guarantees rather than the write lock).
    pub async fn get(&self, id: &str) -> Option<Mock> {
        self.store.get(id).await
    }

    /// All mocks, priority-desc then createdAt-asc.
    pub async fn list(&self) -> Vec<Mock> {
        self.store.list().await
    }

    /// Number of stored mocks.
    pub async fn count(&self) -> usize {
        self.store.count().await
    }

    /// Whether a mock with this ID exists.
    pub async fn exists(&self, id: &str) -> bool {
        self.store.exists(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::mock_manager_test_support::*;

    #[tokio::test]
    async fn add_generates_id_and_stamps_timestamps() {
        let (manager, _http) = test_manager();
        let mock = manager.add(http_mock("", 0)).await.unwrap();
        assert!(!mock.id.is_empty());
        assert_eq!(mock.created_at, mock.updated_at);
    }

    #[tokio::test]
    async fn add_rejects_duplicate_id() {
        let (manager, _http) = test_manager();
        manager.add(http_mock("dup", 0)).await.unwrap();
        let err = manager.add(http_mock("dup", 0)).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateId { .. }));
    }

    #[tokio::test]
    async fn update_preserves_id_and_created_at() {
        let (manager, _http) = test_manager();
        let added = manager.add(http_mock("a", 0)).await.unwrap();
        let updated = manager.update("a", http_mock("ignored", 1)).await.unwrap();
        assert_eq!(updated.id, "a");
        assert_eq!(updated.created_at, added.created_at);
        assert!(updated.updated_at >= added.updated_at);
    }

    #[tokio::test]
    async fn delete_removes_from_store() {
        let (manager, _http) = test_manager();
        manager.add(http_mock("a", 0)).await.unwrap();
        assert!(manager.delete("a").await.unwrap());
        assert!(!manager.exists("a").await);
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let (manager, _http) = test_manager();
        manager.add(http_mock("a", 0)).await.unwrap();
        manager.add(http_mock("b", 0)).await.unwrap();
        manager.clear().await;
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn port_binding_add_failure_rolls_back_the_store() {
        let (manager, _http) = test_manager();
        let mock = grpc_mock("g1", 50999);
        let err = manager.add(mock).await.unwrap_err();
        assert!(matches!(err, Error::PortBindFailure { .. }));
        assert!(!manager.exists("g1").await);
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn grpc_mock_missing_proto_inputs_is_kept_in_store_not_rolled_back() {
        let (manager, _protocols) = test_manager_with_dormant_grpc_factory();
        let mock = grpc_mock("g1", 50998);
        let added = manager.add(mock).await.unwrap();
        assert_eq!(added.id, "g1");
        assert!(manager.exists("g1").await);
        assert_eq!(manager.count().await, 1);
    }
}

#[cfg(test)]
pub(crate) mod mock_manager_test_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use mockforge_core::{
        Error, GrpcSpec, HttpMatcher, HttpResponse, HttpSpec, Mock, MockSpec, MockStore,
        PortBindingServer, RequestLogger, Result, StatefulStore,
    };

    use crate::handler::HttpHandler;
    use crate::mock_manager::MockManager;
    use crate::protocol_manager::{GrpcFactory, ProtocolFactories, ProtocolManager};
    use crate::store_handle::StoreHandle;

    struct DormantGrpcFactory;

    #[async_trait]
    impl GrpcFactory for DormantGrpcFactory {
        async fn start(&self, _mock_id: &str, _spec: &GrpcSpec, _logger: RequestLogger) -> Result<Arc<dyn PortBindingServer>> {
            Err(Error::dormant("no proto files configured"))
        }
    }

    pub fn http_mock(id: &str, priority: i32) -> Mock {
        let now = Utc::now();
        Mock {
            id: id.into(),
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

    pub fn grpc_mock(id: &str, port: u16) -> Mock {
        let now = Utc::now();
        Mock {
            id: id.into(),
            name: None,
            enabled: None,
            created_at: now,
            updated_at: now,
            workspace_id: None,
            spec: MockSpec::Grpc(GrpcSpec {
                port,
                proto_dir: None,
                proto_files: vec![],
                import_paths: vec![],
                responses: HashMap::new(),
            }),
        }
    }

    pub fn test_manager() -> (MockManager, Arc<HttpHandler>) {
        let store = StoreHandle::from(MockStore::new());
        let http = Arc::new(HttpHandler::new(store.clone(), RequestLogger::new(100), StatefulStore::new(), "."));
        let protocols = Arc::new(ProtocolManager::new(ProtocolFactories::default(), RequestLogger::new(100)));
        (MockManager::new(store, http.clone(), protocols), http)
    }

    /// A manager wired with a gRPC factory that always reports missing
    /// proto inputs, for exercising the dormant-not-rejected path.
    pub fn test_manager_with_dormant_grpc_factory() -> (MockManager, Arc<ProtocolManager>) {
        let store = StoreHandle::from(MockStore::new());
        let http = Arc::new(HttpHandler::new(store.clone(), RequestLogger::new(100), StatefulStore::new(), "."));
        let factories = ProtocolFactories {
            grpc: Some(Arc::new(DormantGrpcFactory)),
            ..Default::default()
        };
        let protocols = Arc::new(ProtocolManager::new(factories, RequestLogger::new(100)));
        (MockManager::new(store, http, protocols.clone()), protocols)
    }
}
