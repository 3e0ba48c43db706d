//! Metric instruments for the dispatcher.
//!
//! Instruments come from the `"landmark"` meter on the global provider, so
//! they are no-ops until a host installs one (see [`init_telemetry`]).
//!
//! [`init_telemetry`]: super::init_telemetry

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry_semantic_conventions::attribute::SERVER_ADDRESS;

fn meter() -> Meter {
    opentelemetry::global::meter("landmark")
}

/// Counter: events placed on the dispatch queue.
/// Labels: `kind` ("event" | "identify").
pub fn events_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("landmark.events.enqueued")
        .with_description("Events placed on the dispatch queue")
        .build()
}

/// Counter: tracking requests handed to a transport.
/// Labels: `server.address`.
pub fn requests_sent() -> Counter<u64> {
    meter()
        .u64_counter("landmark.requests.sent")
        .with_description("Tracking requests handed to a transport")
        .build()
}

/// Counter: drains that produced no request.
/// Labels: `reason` ("empty" | "missing_api_key" | "identity_unavailable").
pub fn requests_skipped() -> Counter<u64> {
    meter()
        .u64_counter("landmark.requests.skipped")
        .with_description("Drains that produced no request")
        .build()
}

/// Counter: deliveries that reported failure.
/// Labels: `server.address`.
pub fn deliveries_failed() -> Counter<u64> {
    meter()
        .u64_counter("landmark.deliveries.failed")
        .with_description("Tracking requests that did not succeed")
        .build()
}

/// Label identifying the collector host.
pub fn server_address(host: &str) -> KeyValue {
    KeyValue::new(SERVER_ADDRESS, host.to_string())
}
