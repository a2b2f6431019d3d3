//! The lifecycle contract port-binding protocol instances (gRPC servers,
//! MQTT brokers) satisfy so the protocol manager can start and stop
//! them without depending on their concrete crates.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A running, port-bound protocol instance (a gRPC server or an MQTT
/// broker). Implemented by `mockforge-grpc::GrpcServer` and
/// `mockforge-mqtt::MqttBroker`; the protocol manager only ever touches
/// instances through this trait, so `mockforge-http` never depends on
/// either protocol crate.
#[async_trait]
pub trait PortBindingServer: Send + Sync {
    /// The mock ID this instance was started for.
    fn id(&self) -> &str;

    /// The TCP port this instance is bound to.
    fn port(&self) -> u16;

    /// Gracefully stop the instance, honoring `timeout` as a deadline.
    async fn stop(&self, timeout: Duration) -> Result<()>;
}
