//! WebSocket protocol support for the mockd engine: a generic scripted
//! [`mockforge_http::RouteHandler`] that plays back a mock's configured
//! messages on an interval and echoes whatever the client sends.

mod factory;
mod handler;

pub use factory::GenericWsFactory;
pub use handler::GenericWsHandler;
