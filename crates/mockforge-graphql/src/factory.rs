//! [`GraphQlFactory`] implementation: builds query and subscription
//! handlers from a mock's [`GraphQlSpec`] for the protocol manager.

use std::sync::Arc;

use async_trait::async_trait;
use mockforge_core::{Error, GraphQlSpec, RequestLogger, Result};
use mockforge_http::{GraphQlFactory, RouteHandler};
use tokio::sync::broadcast;

use crate::handler::{GraphQlQueryHandler, GraphQlSubscriptionHandler};
use crate::schema::build_dynamic_schema;

/// The default GraphQL factory: parses inline or file-based SDL and builds
/// a fully dynamic, generically-resolving schema.
#[derive(Default)]
pub struct DynamicGraphQlFactory;

async fn resolve_sdl(spec: &GraphQlSpec) -> Result<String> {
    if let Some(sdl) = &spec.schema {
        return Ok(sdl.clone());
    }
    if let Some(path) = &spec.schema_file {
        return tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::generic(format!("failed to read GraphQL schema file {path}: {e}")));
    }
    Err(Error::validation("graphql mock requires schema or schema_file"))
}

#[async_trait]
impl GraphQlFactory for DynamicGraphQlFactory {
    async fn build_query(&self, spec: &GraphQlSpec, logger: RequestLogger) -> Result<Arc<dyn RouteHandler>> {
        let sdl = resolve_sdl(spec).await?;
        let schema = build_dynamic_schema(&sdl)?;
        Ok(Arc::new(GraphQlQueryHandler::new(schema, logger)))
    }

    async fn build_subscription(
        &self,
        spec: &GraphQlSpec,
        logger: RequestLogger,
        shutdown: broadcast::Sender<String>,
    ) -> Result<Arc<dyn RouteHandler>> {
        let sdl = resolve_sdl(spec).await?;
        let schema = build_dynamic_schema(&sdl)?;
        Ok(Arc::new(GraphQlSubscriptionHandler::new(schema, logger, shutdown)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_query_handler_from_inline_sdl() {
        let factory = DynamicGraphQlFactory;
        let spec = GraphQlSpec {
            path: "/graphql".into(),
            schema: Some("type Query { hello: String! }".into()),
            schema_file: None,
            subscriptions_enabled: false,
        };
        assert!(factory.build_query(&spec, RequestLogger::new(100)).await.is_ok());
    }

    #[tokio::test]
    async fn missing_schema_is_a_validation_error() {
        let factory = DynamicGraphQlFactory;
        let spec = GraphQlSpec {
            path: "/graphql".into(),
            schema: None,
            schema_file: None,
            subscriptions_enabled: false,
        };
        assert!(factory.build_query(&spec, RequestLogger::new(100)).await.is_err());
    }
}
