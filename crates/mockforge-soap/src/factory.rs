//! [`SoapFactory`] implementation: builds a [`SoapHandler`] from a mock's
//! [`SoapSpec`] for the protocol manager.

use std::sync::Arc;

use async_trait::async_trait;
use mockforge_core::{Error, RequestLogger, Result, SoapSpec};
use mockforge_http::{RouteHandler, SoapFactory};

use crate::handler::SoapHandler;

/// The default SOAP handler factory: operations come straight from the
/// mock's configured name -> template map.
#[derive(Default)]
pub struct XmlSoapFactory;

#[async_trait]
impl SoapFactory for XmlSoapFactory {
    async fn build(&self, spec: &SoapSpec, logger: RequestLogger) -> Result<Arc<dyn RouteHandler>> {
        if spec.operations.is_empty() {
            return Err(Error::validation("soap mock requires at least one operation"));
        }
        Ok(Arc::new(SoapHandler::new(spec.operations.clone(), spec.wsdl.clone(), logger)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn builds_a_handler_when_operations_are_present() {
        let factory = XmlSoapFactory;
        let mut ops = HashMap::new();
        ops.insert("Ping".to_string(), "<pong/>".to_string());
        let spec = SoapSpec { path: "/soap".into(), operations: ops, wsdl: None };
        assert!(factory.build(&spec, RequestLogger::new(100)).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_a_spec_with_no_operations() {
        let factory = XmlSoapFactory;
        let spec = SoapSpec { path: "/soap".into(), operations: HashMap::new(), wsdl: None };
        assert!(factory.build(&spec, RequestLogger::new(100)).await.is_err());
    }
}
