//! [`WsFactory`] implementation: builds the generic scripted handler from
//! a mock's [`WebSocketSpec`].

use std::sync::Arc;

use async_trait::async_trait;
use mockforge_core::{RequestLogger, Result, WebSocketSpec};
use mockforge_http::{RouteHandler, WsFactory};

use crate::handler::GenericWsHandler;

/// The default generic WebSocket factory.
#[derive(Default)]
pub struct GenericWsFactory;

#[async_trait]
impl WsFactory for GenericWsFactory {
    async fn build(&self, spec: &WebSocketSpec, logger: RequestLogger) -> Result<Arc<dyn RouteHandler>> {
        Ok(Arc::new(GenericWsHandler::new(spec.messages.clone(), logger)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_a_handler_from_any_spec() {
        let factory = GenericWsFactory;
        let spec = WebSocketSpec { path: "/ws".into(), messages: vec!["hi".into()] };
        assert!(factory.build(&spec, RequestLogger::new(100)).await.is_ok());
    }
}
