//! MQTT protocol support for the mockd engine: an in-process 3.1.1 broker
//! with `+`/`#` wildcard topic matching, QoS 0/1/2 acknowledgement
//! bookkeeping, retained messages, and fixture-driven auto-responses. No
//! persistence or clustering.

mod broker;
mod factory;
mod protocol;
mod server;
mod topics;

pub use factory::InProcessMqttFactory;
pub use server::MqttServer;
