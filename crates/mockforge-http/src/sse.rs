//! Server-Sent Events response emission for mocks whose response carries an
//! [`SseSpec`].

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::stream;
use mockforge_core::{SseSpec, TemplateContext};

/// Build an SSE response that emits `spec.event_template` (template-expanded
/// fresh for each event) every `spec.interval_ms`, stopping after
/// `spec.max_events` events (`0` means unlimited).
pub fn sse_response(spec: SseSpec, ctx: TemplateContext) -> axum::response::Response {
    let interval = Duration::from_millis(spec.interval_ms.max(1));
    let max_events = spec.max_events;

    let state = (0usize, ctx, spec, interval);
    let event_stream = stream::unfold(state, move |(count, ctx, spec, interval)| async move {
        if max_events > 0 && count >= max_events {
            return None;
        }
        tokio::time::sleep(interval).await;
        let data = ctx.expand(&spec.event_template);
        let event: Result<Event, Infallible> = Ok(Event::default().data(data));
        Some((event, (count + 1, ctx, spec, interval)))
    });

    Sse::new(event_stream).keep_alive(KeepAlive::default()).into_response()
}
