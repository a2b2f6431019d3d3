//! [`PortBindingServer`] wiring: binds one [`Broker`] to a TCP port and
//! accepts connections until stopped.

use std::net::SocketAddr;
use std::time::Duration;

use mockforge_core::{Error, PortBindingServer, RequestLogger, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::broker::Broker;

/// A running MQTT broker bound to a single mock's port.
pub struct MqttServer {
    id: String,
    port: u16,
    task: JoinHandle<()>,
}

impl MqttServer {
    pub(crate) async fn bind(
        id: String,
        port: u16,
        fixture_topic: Option<String>,
        fixture_payload: Option<serde_json::Value>,
        logger: RequestLogger,
    ) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::PortBindFailure { message: format!("failed to bind MQTT listener on {addr}: {e}") })?;
        let bound_port = listener
            .local_addr()
            .map_err(|e| Error::generic(format!("failed to read MQTT listener address: {e}")))?
            .port();

        let broker = Broker::new(id.clone(), fixture_topic, fixture_payload, logger);
        info!(%addr, mock_id = %id, "mqtt broker listening");

        let task_id = id.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let broker = broker.clone();
                        tokio::spawn(async move {
                            tracing::debug!(%peer, "accepted mqtt connection");
                            broker.handle_connection(stream).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, mock_id = %task_id, "mqtt accept loop terminated");
                        return;
                    }
                }
            }
        });

        Ok(Self { id, port: bound_port, task })
    }
}

#[async_trait::async_trait]
impl PortBindingServer for MqttServer {
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
