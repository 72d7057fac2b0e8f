//! Span helpers for claim operations.

use tracing::Span;

use crate::model::ItemId;

/// Start a span for a claim against `queue`.
///
/// The `claim.item_id` field is declared empty and filled by
/// [`record_claimed`] when an item is taken.
pub fn start_claim_span(queue: &str) -> Span {
    tracing::debug_span!(
        "wrkr.claim",
        "claim.queue" = queue,
        "claim.item_id" = tracing::field::Empty,
    )
}

/// Record the claimed item on the span and emit a `debug` event in it.
pub fn record_claimed(span: &Span, id: ItemId) {
    span.record("claim.item_id", tracing::field::display(id));
    span.in_scope(|| {
        tracing::debug!(item_id = %id, "claimed");
    });
}
