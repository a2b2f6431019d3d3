//! The middleware chain the server wraps the handler with: tracing
//! outermost, then metrics, then audit, then the dynamic chaos wrapper,
//! then (per-mock) validation inside the handler itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handler::{self, HttpHandler};

/// Process-wide mutable counters, read by the control API and reset by an
/// explicit endpoint.
#[derive(Default)]
pub struct Metrics {
    total_requests: AtomicU64,
}

impl Metrics {
    /// A fresh, zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total requests observed since construction or the last [`Self::reset`].
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
    }
}

/// A thin indirection re-checked per request so the chaos injector can be
/// swapped at runtime without rebuilding the middleware chain. This is the
/// only runtime-swappable layer; wire-level fault injection itself is out
/// of scope and is not implemented here beyond the interposition point.
pub trait ChaosInjector: Send + Sync {
    /// Whether chaos injection is currently enabled.
    fn is_enabled(&self) -> bool;
    /// Enable or disable chaos injection (`PUT /chaos`).
    fn set_enabled(&self, enabled: bool);
}

/// The default injector: an atomic flag that can be toggled through the
/// control API but never actually injects anything — wire-level fault
/// injection is out of core scope.
#[derive(Default)]
pub struct NoopChaosInjector {
    enabled: std::sync::atomic::AtomicBool,
}

impl ChaosInjector for NoopChaosInjector {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

async fn metrics_mw(State(metrics): State<Arc<Metrics>>, req: Request, next: Next) -> Response {
    metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    next.run(req).await
}

async fn audit_mw(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    info!(%method, %path, status = response.status().as_u16(), "request");
    response
}

async fn chaos_mw(State(chaos): State<Arc<dyn ChaosInjector>>, req: Request, next: Next) -> Response {
    if chaos.is_enabled() {
        tracing::debug!("chaos injection enabled (interposition point only)");
    }
    next.run(req).await
}

/// Build the full axum app: the handler wrapped by tracing (outermost),
/// metrics, audit, and the dynamic chaos wrapper, in that order.
pub fn build_app(handler: Arc<HttpHandler>, metrics: Arc<Metrics>, chaos: Arc<dyn ChaosInjector>) -> Router {
    let fallback = move |req: Request| {
        let handler = handler.clone();
        async move { handler::handle(handler, req).await }
    };

    Router::new()
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(chaos, chaos_mw))
        .layer(middleware::from_fn(audit_mw))
        .layer(middleware::from_fn_with_state(metrics, metrics_mw))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_chaos_injector_is_always_disabled() {
        assert!(!NoopChaosInjector::default().is_enabled());
    }

    #[test]
    fn noop_chaos_injector_toggles() {
        let chaos = NoopChaosInjector::default();
        chaos.set_enabled(true);
        assert!(chaos.is_enabled());
    }

    #[test]
    fn metrics_start_at_zero_and_reset() {
        let metrics = Metrics::new();
        assert_eq!(metrics.total_requests(), 0);
        metrics.total_requests.fetch_add(3, Ordering::Relaxed);
        assert_eq!(metrics.total_requests(), 3);
        metrics.reset();
        assert_eq!(metrics.total_requests(), 0);
    }
}
