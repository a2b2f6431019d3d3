//! gRPC protocol support for the mockd engine: proto compilation via
//! `protox` (no `protoc` binary required), a `prost-reflect` descriptor
//! pool, and a single generic unary dispatcher that answers every
//! discovered method with a default-valued instance of its declared
//! output message.

mod codec;
mod descriptor;
mod dispatch;
mod factory;
mod server;

pub use factory::DynamicGrpcFactory;
pub use server::GrpcServer;
