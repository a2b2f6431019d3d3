//! [`GrpcFactory`] implementation: compiles a mock's proto set and binds a
//! dynamic gRPC server to its configured port.

use std::sync::Arc;

use async_trait::async_trait;
use mockforge_core::{GrpcSpec, PortBindingServer, RequestLogger, Result};
use mockforge_http::GrpcFactory;

use crate::descriptor::compile;
use crate::server::GrpcServer;

/// Compiles protos at registration time with `protox` and serves every
/// discovered method generically over a `prost-reflect` descriptor pool.
#[derive(Default)]
pub struct DynamicGrpcFactory;

#[async_trait]
impl GrpcFactory for DynamicGrpcFactory {
    async fn start(&self, mock_id: &str, spec: &GrpcSpec, logger: RequestLogger) -> Result<Arc<dyn PortBindingServer>> {
        let services = compile(spec)?;
        let server = GrpcServer::bind(mock_id.to_string(), spec.port, services, spec.responses.clone(), logger).await?;
        Ok(Arc::new(server))
    }
}
