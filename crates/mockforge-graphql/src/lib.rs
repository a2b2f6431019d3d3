//! GraphQL protocol support for the mockd engine: SDL parsing, a fully
//! dynamic generically-resolving schema, and the query/subscription
//! [`mockforge_http::RouteHandler`]s the protocol manager registers on the
//! shared HTTP listener.

mod factory;
mod handler;
mod schema;

pub use factory::DynamicGraphQlFactory;
pub use handler::{GraphQlQueryHandler, GraphQlSubscriptionHandler};
pub use schema::{build_dynamic_schema, declares_subscription_root};
