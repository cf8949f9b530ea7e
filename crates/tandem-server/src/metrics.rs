//! Metrics collection and export for Tandem.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use tandem_core::{ConnectionSummary, RegistryStats};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tandem_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tandem_connections_active";
    pub const CONNECTIONS_CLOSED: &str = "tandem_connections_closed_total";
    pub const CONNECTION_DURATION_SECONDS: &str = "tandem_connection_duration_seconds";
    pub const FRAMES_RECEIVED: &str = "tandem_frames_received_total";
    pub const FRAMES_MALFORMED: &str = "tandem_frames_malformed_total";
    pub const MESSAGES_TOTAL: &str = "tandem_messages_total";
    pub const BYTES_TOTAL: &str = "tandem_bytes_total";
    pub const ROOMS_ACTIVE: &str = "tandem_rooms_active";
    pub const EVENTS_DELIVERED: &str = "tandem_events_delivered";
    pub const EVENTS_DROPPED: &str = "tandem_events_dropped";
    pub const REJECTIONS_TOTAL: &str = "tandem_rejections_total";
    pub const ERRORS_TOTAL: &str = "tandem_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_CLOSED,
        "Closed connections by close reason"
    );
    metrics::describe_histogram!(
        names::CONNECTION_DURATION_SECONDS,
        "Connection lifetime in seconds"
    );
    metrics::describe_counter!(names::FRAMES_RECEIVED, "Frames read from clients");
    metrics::describe_counter!(
        names::FRAMES_MALFORMED,
        "Client frames dropped because they failed to decode"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Payload messages by direction");
    metrics::describe_counter!(names::BYTES_TOTAL, "Payload bytes by direction");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of document rooms");
    metrics::describe_gauge!(
        names::EVENTS_DELIVERED,
        "Events accepted into outbound queues since server start"
    );
    metrics::describe_gauge!(
        names::EVENTS_DROPPED,
        "Events dropped on full outbound queues since server start"
    );
    metrics::describe_counter!(
        names::REJECTIONS_TOTAL,
        "Upgrade requests rejected before upgrade, by code"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a rejected upgrade request.
pub fn record_rejection(code: &'static str) {
    counter!(names::REJECTIONS_TOTAL, "code" => code).increment(1);
}

/// Record what a finished connection did.
pub fn record_summary(summary: &ConnectionSummary) {
    counter!(names::CONNECTIONS_CLOSED, "reason" => summary.reason.as_str()).increment(1);
    counter!(names::FRAMES_RECEIVED).increment(summary.frames_received);
    counter!(names::FRAMES_MALFORMED).increment(summary.malformed_frames);
    counter!(names::MESSAGES_TOTAL, "direction" => "inbound").increment(summary.frames_received);
    counter!(names::MESSAGES_TOTAL, "direction" => "outbound").increment(summary.messages_sent);
    counter!(names::BYTES_TOTAL, "direction" => "inbound").increment(summary.bytes_received);
    counter!(names::BYTES_TOTAL, "direction" => "outbound").increment(summary.bytes_sent);
}

/// Publish registry statistics.
pub fn record_registry(stats: &RegistryStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
    gauge!(names::EVENTS_DELIVERED).set(stats.delivered as f64);
    gauge!(names::EVENTS_DROPPED).set(stats.dropped as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection and lifetime on drop.
pub struct ConnectionMetricsGuard {
    started: Instant,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(names::CONNECTION_DURATION_SECONDS).record(self.started.elapsed().as_secs_f64());
    }
}
