//! [`PortBindingServer`] wiring: binds a compiled proto set to a TCP port
//! and serves it through the generic unary dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mockforge_core::{Error, PortBindingServer, RequestLogger, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::descriptor::CompiledService;
use crate::dispatch::{router, DispatchState};

/// A running dynamic gRPC server for a single mock.
pub struct GrpcServer {
    id: String,
    port: u16,
    task: JoinHandle<()>,
}

impl GrpcServer {
    pub(crate) async fn bind(
        id: String,
        port: u16,
        services: Vec<CompiledService>,
        responses: std::collections::HashMap<String, serde_json::Value>,
        logger: RequestLogger,
    ) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::PortBindFailure { message: format!("failed to bind gRPC listener on {addr}: {e}") })?;
        let bound_port = listener
            .local_addr()
            .map_err(|e| Error::generic(format!("failed to read gRPC listener address: {e}")))?
            .port();

        let state = Arc::new(DispatchState::new(id.clone(), services, responses, logger));
        let app = router(state);
        info!(%addr, mock_id = %id, "gRPC listener bound");

        let task_id = id.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, mock_id = %task_id, "gRPC listener terminated");
            }
        });

        Ok(Self { id, port: bound_port, task })
    }
}

#[async_trait::async_trait]
impl PortBindingServer for GrpcServer {
    fn id(&self) -> &str {
        &self.id
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn stop(&self, _timeout: Duration) -> Result<()> {
        self.task.abort();
        Ok(())
    }
}
