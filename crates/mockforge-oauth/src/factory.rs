//! [`OAuthFactory`] implementation: builds the combined [`OAuthHandler`]
//! from a mock's [`OAuthSpec`] for the protocol manager.

use std::sync::Arc;

use async_trait::async_trait;
use mockforge_core::{OAuthSpec, RequestLogger, Result};
use mockforge_http::{OAuthFactory, RouteHandler};

use crate::handler::OAuthHandler;

/// The default OAuth provider factory: HMAC-signed JWTs, no external key
/// material.
#[derive(Default)]
pub struct JwtOAuthFactory;

#[async_trait]
impl OAuthFactory for JwtOAuthFactory {
    async fn build(&self, spec: &OAuthSpec, logger: RequestLogger) -> Result<Arc<dyn RouteHandler>> {
        Ok(Arc::new(OAuthHandler::new(
            spec.issuer_path.clone(),
            spec.signing_secret.clone(),
            spec.token_ttl_secs,
            logger,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_a_handler_for_the_spec() {
        let factory = JwtOAuthFactory;
        let spec = OAuthSpec {
            issuer_path: "/oauth".into(),
            signing_secret: "secret".into(),
            token_ttl_secs: 3600,
        };
        assert!(factory.build(&spec, RequestLogger::new(100)).await.is_ok());
    }
}
