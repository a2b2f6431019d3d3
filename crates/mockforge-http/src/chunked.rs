//! Chunked-transfer response emission for mocks whose response carries a
//! [`ChunkedSpec`].

use std::time::Duration;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream;
use mockforge_core::{ChunkedSpec, TemplateContext};

/// Build a chunked-transfer response writing each of `spec.chunks`
/// (template-expanded) as one chunk, `spec.interval_ms` apart.
pub fn chunked_response(spec: ChunkedSpec, ctx: TemplateContext, status: u16) -> Response {
    let interval = Duration::from_millis(spec.interval_ms);
    let chunks: Vec<String> = spec.chunks.iter().map(|c| ctx.expand(c)).collect();

    let body_stream = stream::unfold(chunks.into_iter(), move |mut remaining| async move {
        let next = remaining.next()?;
        if interval > Duration::ZERO {
            tokio::time::sleep(interval).await;
        }
        Some((Ok::<_, std::io::Error>(Bytes::from(next)), remaining))
    });

    let status_code = axum::http::StatusCode::from_u16(status)
        .unwrap_or(axum::http::StatusCode::OK);
    (status_code, Body::from_stream(body_stream)).into_response()
}
