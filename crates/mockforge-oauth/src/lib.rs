//! OAuth2/OIDC protocol support for the mockd engine: a single combined
//! [`mockforge_http::RouteHandler`] serving the seven well-known routes
//! under a mock's configured issuer path prefix.

mod claims;
mod factory;
mod handler;

pub use claims::Claims;
pub use factory::JwtOAuthFactory;
pub use handler::OAuthHandler;
