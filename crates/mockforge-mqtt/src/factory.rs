//! [`MqttFactory`] implementation: binds a broker to a mock's configured
//! port and seeds its fixture topic/payload as a retained message.

use std::sync::Arc;

use async_trait::async_trait;
use mockforge_core::{MqttSpec, PortBindingServer, RequestLogger, Result};
use mockforge_http::MqttFactory;

use crate::server::MqttServer;

/// The default MQTT broker factory.
#[derive(Default)]
pub struct InProcessMqttFactory;

#[async_trait]
impl MqttFactory for InProcessMqttFactory {
    async fn start(&self, mock_id: &str, spec: &MqttSpec, logger: RequestLogger) -> Result<Arc<dyn PortBindingServer>> {
        let server =
            MqttServer::bind(mock_id.to_string(), spec.port, spec.topic.clone(), spec.payload.clone(), logger)
                .await?;
        Ok(Arc::new(server))
    }
}
