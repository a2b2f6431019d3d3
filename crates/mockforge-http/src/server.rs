//! The server: composes the mock store, handler, protocol manager and
//! mock manager from a [`ServerConfiguration`], and owns the HTTP, HTTPS
//! and management-API listener lifecycle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use mockforge_core::{Error, MockStore, RequestLogger, Result, ServerConfiguration, StatefulStore};

use crate::control_api::{build_router, ControlApiState};
use crate::handler::HttpHandler;
use crate::middleware::{build_app, ChaosInjector, Metrics, NoopChaosInjector};
use crate::mock_manager::MockManager;
use crate::protocol_manager::{ProtocolFactories, ProtocolManager};
use crate::store_handle::StoreHandle;
use crate::tls;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const MANAGEMENT_PORT_SCAN_START: u16 = 4281;
const MANAGEMENT_PORT_SCAN_ATTEMPTS: u16 = 100;

/// The composed engine, built once from a [`ServerConfiguration`] and
/// started/stopped as a unit.
pub struct Server {
    config: ServerConfiguration,
    handler: Arc<HttpHandler>,
    logger: RequestLogger,
    #[allow(dead_code)]
    stateful: StatefulStore,
    protocols: Arc<ProtocolManager>,
    mock_manager: Arc<MockManager>,
    metrics: Arc<Metrics>,
    chaos: Arc<dyn ChaosInjector>,
    control_state: ControlApiState,
    running: AtomicBool,
    start_time: Mutex<Option<Instant>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Build every component in the server's construction list:
    /// in-memory mock store, handler, bounded request logger, stateful
    /// store, protocol manager (wired with `factories`), and mock manager.
    pub fn new(config: ServerConfiguration, factories: ProtocolFactories) -> Self {
        let store = StoreHandle::from(MockStore::new());
        let logger = RequestLogger::new(config.max_log_entries);
        let stateful = StatefulStore::new();
        let handler = Arc::new(HttpHandler::new(
            store.clone(),
            logger.clone(),
            stateful.clone(),
            config.base_dir.clone(),
        ));
        let protocols = Arc::new(ProtocolManager::new(factories, logger.clone()));
        let mock_manager = Arc::new(MockManager::new(store, handler.clone(), protocols.clone()));
        let metrics = Arc::new(Metrics::new());
        let chaos: Arc<dyn ChaosInjector> = Arc::new(NoopChaosInjector::default());

        let control_state = ControlApiState {
            mock_manager: mock_manager.clone(),
            logger: logger.clone(),
            protocol_manager: protocols.clone(),
            http_handler: handler.clone(),
            stateful: stateful.clone(),
            metrics: metrics.clone(),
            chaos: chaos.clone(),
            start_time: Instant::now(),
        };

        Self {
            config,
            handler,
            logger,
            stateful,
            protocols,
            mock_manager,
            metrics,
            chaos,
            control_state,
            running: AtomicBool::new(false),
            start_time: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The mock manager, for callers composing startup mocks or
    /// wiring a config-file loader.
    pub fn mock_manager(&self) -> Arc<MockManager> {
        self.mock_manager.clone()
    }

    /// The shared HTTP handler. Workspace listeners build their own
    /// handler over a filtered store rather than sharing this one; this
    /// accessor exists for tests and introspection.
    pub fn handler(&self) -> Arc<HttpHandler> {
        self.handler.clone()
    }

    /// The request logger.
    pub fn logger(&self) -> &RequestLogger {
        &self.logger
    }

    /// Whether `Start` has completed successfully and `Stop` has not yet
    /// been called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the middleware chain, protocol manager, HTTP/HTTPS listeners
    /// and the management control API. Re-entering while
    /// already running is an error.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::generic("server is already running"));
        }

        self.protocols.start_all(&self.handler, &self.config).await?;

        let app = build_app(self.handler.clone(), self.metrics.clone(), self.chaos.clone());
        let mut tasks = Vec::new();

        if self.config.http_port > 0 {
            let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| Error::generic(format!("failed to bind HTTP listener on {addr}: {e}")))?;
            info!(%addr, "HTTP listener bound");
            let app = app.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "HTTP listener terminated");
                }
            }));
        }

        if self.config.https_port > 0 {
            let addr = SocketAddr::from(([0, 0, 0, 0], self.config.https_port));
            let server_config = tls::build_server_config(&self.config.tls)?;
            let tls_config = RustlsConfig::from_config(server_config);
            info!(%addr, "HTTPS listener bound");
            let app = app.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await {
                    error!(error = %e, "HTTPS listener terminated");
                }
            }));
        }

        let control_listener = bind_management_listener(self.config.management_port).await?;
        let control_addr = control_listener
            .local_addr()
            .map_err(|e| Error::generic(format!("failed to read management listener address: {e}")))?;
        info!(addr = %control_addr, "management API listener bound");
        let control_app = build_router(self.control_state.clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(control_listener, control_app).await {
                error!(error = %e, "management API listener terminated");
            }
        }));

        *self.start_time.lock().await = Some(Instant::now());
        *self.tasks.lock().await = tasks;
        Ok(())
    }

    /// Idempotently stop every listener and protocol instance, bounded by a
    /// 5-second deadline per subsystem. Accumulates errors
    /// from each subsystem and returns the first.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let protocol_result = tokio::time::timeout(STOP_TIMEOUT, self.protocols.stop_all(&self.handler, STOP_TIMEOUT))
            .await
            .unwrap_or_else(|_| Err(Error::generic("timed out stopping protocol instances")));

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        *self.start_time.lock().await = None;

        protocol_result
    }
}

/// Bind the management listener on `configured_port`, or if zero, scan up
/// to 100 consecutive ports starting at 4281 for the first free one,
/// falling back to an ephemeral port if every candidate is busy.
async fn bind_management_listener(configured_port: u16) -> Result<TcpListener> {
    if configured_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], configured_port));
        return TcpListener::bind(addr)
            .await
            .map_err(|e| Error::generic(format!("failed to bind management listener on {addr}: {e}")));
    }

    for offset in 0..MANAGEMENT_PORT_SCAN_ATTEMPTS {
        let port = MANAGEMENT_PORT_SCAN_START + offset;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        if let Ok(listener) = TcpListener::bind(addr).await {
            return Ok(listener);
        }
    }

    let ephemeral = SocketAddr::from(([0, 0, 0, 0], 0));
    TcpListener::bind(ephemeral)
        .await
        .map_err(|e| Error::generic(format!("failed to bind an ephemeral management listener: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_stop_roundtrips_and_rejects_reentrant_start() {
        let mut config = ServerConfiguration::default();
        config.http_port = 0;
        config.https_port = 0;
        config.management_port = 0;
        let server = Server::new(config, ProtocolFactories::default());

        server.start().await.unwrap();
        assert!(server.is_running());
        assert!(server.start().await.is_err());

        server.stop().await.unwrap();
        assert!(!server.is_running());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn management_listener_scans_from_4281_when_unconfigured() {
        let listener = bind_management_listener(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port >= MANAGEMENT_PORT_SCAN_START);
    }
}
