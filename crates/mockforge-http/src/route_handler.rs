//! The trait route-sharing protocol handlers (WebSocket, GraphQL, OAuth,
//! SOAP) implement so the HTTP handler can dispatch to them without
//! depending on their crates. The protocol manager is the only thing
//! that writes into [`crate::handler::HttpHandler`]'s route tables; the
//! handler only reads them on each request.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;

/// A registered handler for one route-sharing protocol endpoint.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handle one HTTP request routed to this endpoint.
    async fn handle(&self, req: Request<Body>) -> Response;
}
