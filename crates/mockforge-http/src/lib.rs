//! HTTP dispatch, mock management, protocol lifecycle,
//! server composition, per-workspace listeners and the
//! management control API for the mockd engine.
//!
//! `mockforge-core` owns the data model and storage; this crate wires it
//! into a running, observable HTTP surface and exposes the extension
//! points (`RouteHandler`, the protocol factory traits) that the
//! per-protocol crates implement.

mod chunked;
mod control_api;
mod handler;
mod middleware;
mod mock_manager;
mod protocol_manager;
mod route_handler;
mod server;
mod sse;
mod store_handle;
mod tls;
mod workspace;

pub use control_api::{build_router as build_control_router, ControlApiState};
pub use handler::HttpHandler;
pub use middleware::{build_app, ChaosInjector, Metrics, NoopChaosInjector};
pub use mock_manager::MockManager;
pub use protocol_manager::{
    GraphQlFactory, GrpcFactory, MqttFactory, OAuthFactory, ProtocolFactories, ProtocolManager,
    ProtocolStatus, SoapFactory, WsFactory,
};
pub use route_handler::RouteHandler;
pub use server::Server;
pub use store_handle::StoreHandle;
pub use tls::{build_server_config, identity_allowed, MtlsIdentity};
pub use workspace::{MockFetcher, WorkspaceManager, WorkspaceSpec, WorkspaceStatus};
