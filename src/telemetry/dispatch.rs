//! Span helpers for queue drains.

use tracing::Span;

/// Start a span covering one drain.
///
/// `outcome` is declared empty and filled in via [`record_outcome`].
pub fn start_dispatch_span(action: &str, seq: u64) -> Span {
    tracing::debug_span!(
        "landmark.dispatch",
        "event.action" = action,
        "dispatch.seq" = seq,
        "dispatch.outcome" = tracing::field::Empty,
    )
}

/// Record how a drain ended ("sent", "empty", "missing_api_key", ...).
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("dispatch.outcome", outcome);
}
