//! Metric instrument factories for wrkr-store.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"wrkr-store"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for wrkr-store instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("wrkr-store")
}

/// Counter: number of queue items published.
/// Labels: `result` ("ok" | "error").
pub fn items_published() -> Counter<u64> {
    meter()
        .u64_counter("wrkr.items.published")
        .with_description("Number of queue items published")
        .build()
}

/// Counter: claim attempts.
/// Labels: `result` ("claimed" | "empty").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("wrkr.items.claims")
        .with_description("Number of claim attempts")
        .build()
}

/// Counter: queue items permanently removed.
pub fn items_removed() -> Counter<u64> {
    meter()
        .u64_counter("wrkr.items.removed")
        .with_description("Number of queue items removed")
        .build()
}

/// Counter: subscription changes.
/// Labels: `operation` ("subscribe" | "unsubscribe").
pub fn subscription_changes() -> Counter<u64> {
    meter()
        .u64_counter("wrkr.subscriptions.changes")
        .with_description("Number of subscribe/unsubscribe calls")
        .build()
}

/// Histogram: claim round-trip duration in milliseconds.
/// Labels: `result` ("claimed" | "empty").
pub fn claim_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("wrkr.claim.duration_ms")
        .with_description("Claim round-trip duration in milliseconds")
        .with_unit("ms")
        .build()
}
