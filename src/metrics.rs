//! Prometheus metrics for the delivery worker
//!
//! Exposed as text so a scheduler wrapper can scrape or dump them.

use crate::{PostboxError, Result};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram, CounterVec,
    Encoder, Gauge, GaugeVec, Histogram, TextEncoder,
};

lazy_static! {
    /// Histogram: wall-clock duration of one worker invocation (seconds)
    pub static ref INVOCATION_DURATION: Histogram = register_histogram!(
        "postbox_invocation_duration_seconds",
        "Duration of queue processing invocations",
        vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]
    )
    .expect("Failed to create invocation_duration metric");

    /// Histogram: duration of a single transport call (seconds)
    pub static ref DELIVERY_DURATION: Histogram = register_histogram!(
        "postbox_delivery_duration_seconds",
        "Duration of individual delivery attempts",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to create delivery_duration metric");

    /// Counter: delivery attempts by outcome
    pub static ref DELIVERY_ATTEMPTS: CounterVec = register_counter_vec!(
        "postbox_delivery_attempts_total",
        "Delivery attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to create delivery_attempts metric");

    /// Counter: invocations by result
    pub static ref INVOCATIONS: CounterVec = register_counter_vec!(
        "postbox_invocations_total",
        "Worker invocations by result",
        &["result"]
    )
    .expect("Failed to create invocations metric");

    /// Counter: stuck rows released back to the queue
    pub static ref RECOVERED_MESSAGES: CounterVec = register_counter_vec!(
        "postbox_recovered_messages_total",
        "Messages recovered from an interrupted attempt",
        &["source"]
    )
    .expect("Failed to create recovered_messages metric");

    /// Gauge: messages per status after the last invocation
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "postbox_queue_depth",
        "Messages in the queue by status",
        &["status"]
    )
    .expect("Failed to create queue_depth metric");

    /// Gauge: 1 when active transport settings exist, 0 when delivery is disabled
    pub static ref TRANSPORT_CONFIGURED: Gauge = register_gauge!(
        "postbox_transport_configured",
        "Whether active transport settings exist (1 = yes, 0 = no)"
    )
    .expect("Failed to create transport_configured metric");
}

/// Record a finished invocation
pub fn record_invocation(result: &str, duration_secs: f64) {
    INVOCATIONS.with_label_values(&[result]).inc();
    INVOCATION_DURATION.observe(duration_secs);
}

/// Record the outcome of one delivery attempt
pub fn record_delivery(outcome: &str, duration_secs: f64) {
    DELIVERY_ATTEMPTS.with_label_values(&[outcome]).inc();
    DELIVERY_DURATION.observe(duration_secs);
}

/// Record rows recovered from a stuck `processing` state
pub fn record_recovered(source: &str, count: usize) {
    RECOVERED_MESSAGES
        .with_label_values(&[source])
        .inc_by(count as f64);
}

/// Set the depth gauge for a status
pub fn set_queue_depth(status: &str, depth: usize) {
    QUEUE_DEPTH.with_label_values(&[status]).set(depth as f64);
}

pub fn set_transport_configured(configured: bool) {
    TRANSPORT_CONFIGURED.set(if configured { 1.0 } else { 0.0 });
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| PostboxError::Other(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| PostboxError::Other(format!("Metrics are not UTF-8: {}", e)))
}
