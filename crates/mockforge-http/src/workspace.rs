//! The workspace manager: per-workspace HTTP listeners, each backed
//! by a [`FilteredMockStore`] view of a shared central store, started and
//! stopped on demand by an external admin polling client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use mockforge_core::{Error, FilteredMockStore, Mock, MockStore, RequestLogger, Result, StatefulStore};

use crate::handler::HttpHandler;
use crate::middleware::{build_app, ChaosInjector, Metrics, NoopChaosInjector};
use crate::store_handle::StoreHandle;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_LOG_CAPACITY: usize = 1000;

/// One workspace assignment from the external admin client.
#[derive(Debug, Clone)]
pub struct WorkspaceSpec {
    /// Unique, non-empty workspace identifier
    pub id: String,
    /// Display name, for admin tooling only
    pub name: Option<String>,
    /// TCP port for this workspace's own HTTP listener; must be in 1..65535
    pub http_port: u16,
    /// Reserved for a future per-workspace gRPC listener
    pub grpc_port: u16,
    /// Reserved for a future per-workspace MQTT broker
    pub mqtt_port: u16,
}

/// Lifecycle status of one workspace listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceStatus {
    /// Not started, or stopped since
    Stopped,
    /// Binding its listener
    Starting,
    /// Serving requests
    Running,
    /// Failed to start or crashed; carries a human-readable reason
    Error(String),
}

/// Pulls a workspace's mocks from an external source, as an alternative to
/// relying solely on the central store's existing workspace-stamped
/// records. Out of scope beyond this interface.
#[async_trait]
pub trait MockFetcher: Send + Sync {
    /// Fetch the current mock set for `workspace_id`.
    async fn fetch(&self, workspace_id: &str) -> Result<Vec<Mock>>;
}

struct RunningWorkspace {
    spec: WorkspaceSpec,
    status: WorkspaceStatus,
    handle: axum_server::Handle,
}

/// Manages the set of live per-workspace listeners over a shared central
/// [`MockStore`].
pub struct WorkspaceManager {
    central: MockStore,
    base_dir: String,
    fetcher: Option<Arc<dyn MockFetcher>>,
    workspaces: RwLock<HashMap<String, RunningWorkspace>>,
    /// Status of workspaces not (or no longer) present in `workspaces`:
    /// `Starting` while a bind is in flight, `Error` after a failed attempt.
    statuses: RwLock<HashMap<String, WorkspaceStatus>>,
}

impl WorkspaceManager {
    /// Build a manager over `central`, resolving `bodyFile` paths against
    /// `base_dir`, optionally pulling mocks through `fetcher` instead of
    /// relying on the central store's existing workspace-stamped records.
    pub fn new(central: MockStore, base_dir: impl Into<String>, fetcher: Option<Arc<dyn MockFetcher>>) -> Self {
        Self {
            central,
            base_dir: base_dir.into(),
            fetcher,
            workspaces: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
        }
    }

    fn validate(spec: &WorkspaceSpec) -> Result<()> {
        if spec.id.is_empty() {
            return Err(Error::validation("workspace id must not be empty"));
        }
        if spec.http_port == 0 {
            return Err(Error::validation("workspace httpPort must be in 1..65535"));
        }
        Ok(())
    }

    async fn load_mocks(&self, store: &FilteredMockStore, workspace_id: &str) -> Result<()> {
        let Some(fetcher) = &self.fetcher else {
            return Ok(());
        };
        let fetched = fetcher.fetch(workspace_id).await?;
        store.clear().await;
        for mock in fetched {
            store.set(mock).await;
        }
        Ok(())
    }

    /// Start (or restart) a workspace listener: validates `spec`, stops any
    /// prior instance of the same workspace, binds its TCP port
    /// synchronously so a conflict surfaces before this call returns, then
    /// serves in the background.
    pub async fn start_workspace(&self, spec: WorkspaceSpec) -> Result<()> {
        Self::validate(&spec)?;

        if self.workspaces.read().await.contains_key(&spec.id) {
            self.stop_workspace(&spec.id).await?;
        }

        self.statuses.write().await.insert(spec.id.clone(), WorkspaceStatus::Starting);

        let store = FilteredMockStore::new(self.central.clone(), spec.id.clone());
        if let Err(e) = self.load_mocks(&store, &spec.id).await {
            let msg = format!("workspace {}: failed to load mocks: {e}", spec.id);
            self.statuses.write().await.insert(spec.id.clone(), WorkspaceStatus::Error(msg.clone()));
            return Err(Error::generic(msg));
        }

        let handler = Arc::new(HttpHandler::new(
            StoreHandle::from(store),
            RequestLogger::new(DEFAULT_LOG_CAPACITY),
            StatefulStore::new(),
            self.base_dir.clone(),
        ));
        let metrics = Arc::new(Metrics::new());
        let chaos: Arc<dyn ChaosInjector> = Arc::new(NoopChaosInjector::default());
        let app = build_app(handler, metrics, chaos);

        let addr = SocketAddr::from(([0, 0, 0, 0], spec.http_port));
        let std_listener = match std::net::TcpListener::bind(addr) {
            Ok(l) => l,
            Err(e) => {
                let msg = format!("workspace {}: failed to bind port {}: {e}", spec.id, spec.http_port);
                self.statuses.write().await.insert(spec.id.clone(), WorkspaceStatus::Error(msg.clone()));
                return Err(Error::generic(msg));
            }
        };
        if let Err(e) = std_listener.set_nonblocking(true) {
            let msg = format!("workspace {}: {e}", spec.id);
            self.statuses.write().await.insert(spec.id.clone(), WorkspaceStatus::Error(msg.clone()));
            return Err(Error::generic(msg));
        }

        let handle = axum_server::Handle::new();
        let serve_handle = handle.clone();
        let workspace_id = spec.id.clone();
        tokio::spawn(async move {
            let result = axum_server::from_tcp(std_listener)
                .handle(serve_handle)
                .serve(app.into_make_service())
                .await;
            if let Err(e) = result {
                error!(workspace_id = %workspace_id, error = %e, "workspace listener terminated");
            }
        });

        info!(workspace_id = %spec.id, port = spec.http_port, "workspace listener started");
        self.statuses.write().await.remove(&spec.id);
        self.workspaces.write().await.insert(
            spec.id.clone(),
            RunningWorkspace { spec, status: WorkspaceStatus::Running, handle },
        );
        Ok(())
    }

    /// Gracefully stop a workspace's listener within a 5-second deadline.
    /// A missing workspace is a no-op.
    pub async fn stop_workspace(&self, id: &str) -> Result<()> {
        self.statuses.write().await.remove(id);
        let Some(running) = self.workspaces.write().await.remove(id) else {
            return Ok(());
        };
        running.handle.graceful_shutdown(Some(STOP_TIMEOUT));
        info!(workspace_id = %id, "workspace listener stopped");
        Ok(())
    }

    /// Re-pull a workspace's mocks through its [`MockFetcher`] and replace
    /// the filtered view's contents. Requires a fetcher to have been
    /// configured; without one this is a validation error.
    pub async fn reload_workspace(&self, id: &str) -> Result<()> {
        if self.fetcher.is_none() {
            return Err(Error::validation("no MockFetcher configured; cannot reload"));
        }
        if !self.workspaces.read().await.contains_key(id) {
            return Err(Error::NotFound { id: id.to_string() });
        }
        let store = FilteredMockStore::new(self.central.clone(), id);
        self.load_mocks(&store, id).await?;
        info!(workspace_id = %id, "workspace mocks reloaded");
        Ok(())
    }

    /// Stop every workspace, continuing past individual failures and
    /// returning the first error encountered.
    pub async fn stop_all(&self) -> Result<()> {
        let ids: Vec<String> = self.workspaces.read().await.keys().cloned().collect();
        let mut first_err = None;
        for id in ids {
            if let Err(e) = self.stop_workspace(&id).await {
                warn!(workspace_id = %id, error = %e, "failed to stop workspace");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Current status of a workspace, or `Stopped` if it has never been
    /// started (or was already stopped).
    pub async fn status(&self, id: &str) -> WorkspaceStatus {
        if let Some(w) = self.workspaces.read().await.get(id) {
            return w.status.clone();
        }
        self.statuses.read().await.get(id).cloned().unwrap_or(WorkspaceStatus::Stopped)
    }

    /// Every currently tracked workspace's spec and status.
    pub async fn list(&self) -> Vec<(WorkspaceSpec, WorkspaceStatus)> {
        self.workspaces
            .read()
            .await
            .values()
            .map(|w| (w.spec.clone(), w.status.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_empty_id() {
        let manager = WorkspaceManager::new(MockStore::new(), ".", None);
        let err = manager
            .start_workspace(WorkspaceSpec { id: String::new(), name: None, http_port: 9000, grpc_port: 0, mqtt_port: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn rejects_zero_http_port() {
        let manager = WorkspaceManager::new(MockStore::new(), ".", None);
        let err = manager
            .start_workspace(WorkspaceSpec { id: "ws1".into(), name: None, http_port: 0, grpc_port: 0, mqtt_port: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn stopping_an_unknown_workspace_is_a_no_op() {
        let manager = WorkspaceManager::new(MockStore::new(), ".", None);
        assert!(manager.stop_workspace("nope").await.is_ok());
    }

    #[tokio::test]
    async fn reload_without_fetcher_is_an_error() {
        let manager = WorkspaceManager::new(MockStore::new(), ".", None);
        let err = manager.reload_workspace("ws1").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn start_and_stop_workspace_roundtrips() {
        let manager = WorkspaceManager::new(MockStore::new(), ".", None);
        // Bind an ephemeral port up front so the test doesn't race a fixed one.
        let probe = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        manager
            .start_workspace(WorkspaceSpec { id: "ws1".into(), name: None, http_port: port, grpc_port: 0, mqtt_port: 0 })
            .await
            .unwrap();
        assert_eq!(manager.status("ws1").await, WorkspaceStatus::Running);

        manager.stop_workspace("ws1").await.unwrap();
        assert_eq!(manager.status("ws1").await, WorkspaceStatus::Stopped);
    }

    #[tokio::test]
    async fn failed_bind_leaves_an_error_status() {
        let manager = WorkspaceManager::new(MockStore::new(), ".", None);
        let occupied = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let err = manager
            .start_workspace(WorkspaceSpec { id: "ws1".into(), name: None, http_port: port, grpc_port: 0, mqtt_port: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generic(_)));
        assert!(matches!(manager.status("ws1").await, WorkspaceStatus::Error(_)));

        drop(occupied);
    }
}
