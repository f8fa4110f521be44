//! Span constructors shared by the HTTP and live-channel front ends.

use tracing::{Level, Span, span};

/// Span around one conversion request.
pub fn render_span(transport: &'static str, format: &str) -> Span {
    span!(
        Level::INFO,
        "render.request",
        mmdr.transport = transport,
        mmdr.format = format,
        mmdr.cache_status = tracing::field::Empty,
        mmdr.cache_key = tracing::field::Empty,
    )
}

/// Span covering the lifetime of one live-channel connection.
pub fn live_session_span(session_id: &str, peer: &str) -> Span {
    span!(
        Level::INFO,
        "live.session",
        mmdr.session.id = session_id,
        mmdr.session.peer = peer,
    )
}
