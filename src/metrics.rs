//! Prometheus metrics for the inference server
//!
//! Registered once in the default registry via lazy statics and incremented
//! inline at the points of interest.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    /// Total connections accepted by the listener
    pub static ref CONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        "npud_connections_total",
        "Total accepted client connections"
    )
    .unwrap();

    /// Connections rejected because the worker pool was at capacity
    pub static ref CONNECTIONS_REJECTED_TOTAL: IntCounter = register_int_counter!(
        "npud_connections_rejected_total",
        "Connections rejected at worker pool capacity"
    )
    .unwrap();

    /// Protocol errors by kind (short_header, short_body, oversized, io, timeout)
    pub static ref PROTOCOL_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "npud_protocol_errors_total",
        "Frame decode failures by kind",
        &["kind"]
    )
    .unwrap();

    /// Connections currently being served
    pub static ref REQUESTS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "npud_requests_in_flight",
        "Connections currently being served"
    )
    .unwrap();

    /// Request payload sizes in bytes
    pub static ref REQUEST_SIZE_BYTES: Histogram = register_histogram!(
        "npud_request_size_bytes",
        "Request payload size in bytes",
        prometheus::exponential_buckets(64.0, 4.0, 10).unwrap()
    )
    .unwrap();

    /// Response payload sizes in bytes
    pub static ref RESPONSE_SIZE_BYTES: Histogram = register_histogram!(
        "npud_response_size_bytes",
        "Response payload size in bytes",
        prometheus::exponential_buckets(64.0, 4.0, 10).unwrap()
    )
    .unwrap();

    /// Time spent inside the engine critical section per request
    pub static ref INFERENCE_DURATION: Histogram = register_histogram!(
        "npud_inference_duration_seconds",
        "Inference execution time in seconds"
    )
    .unwrap();

    /// Inference failures by kind (each one becomes an empty response)
    pub static ref INFERENCE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "npud_inference_errors_total",
        "Inference failures by kind",
        &["kind"]
    )
    .unwrap();
}
