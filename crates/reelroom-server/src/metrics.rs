//! Metrics collection and export for Reelroom.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use reelroom_core::RegistryStats;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "reelroom_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "reelroom_connections_active";
    pub const MESSAGES_TOTAL: &str = "reelroom_messages_total";
    pub const MESSAGES_BYTES: &str = "reelroom_messages_bytes";
    pub const EVENTS_TOTAL: &str = "reelroom_events_total";
    pub const ROOMS_ACTIVE: &str = "reelroom_rooms_active";
    pub const MEMBERS_DROPPED_TOTAL: &str = "reelroom_members_dropped_total";
    pub const STORE_ERRORS_TOTAL: &str = "reelroom_store_errors_total";
    pub const ERRORS_TOTAL: &str = "reelroom_errors_total";
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
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Server events written, by event type");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_counter!(
        names::MEMBERS_DROPPED_TOTAL,
        "Members disconnected after a failed delivery"
    );
    metrics::describe_counter!(names::STORE_ERRORS_TOTAL, "Failed chat/like store calls");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame read from or written to a client.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a server event written to a client.
pub fn record_event(event_type: &'static str) {
    counter!(names::EVENTS_TOTAL, "event_type" => event_type).increment(1);
}

/// Publish registry and store counters.
pub fn record_hub_stats(stats: &RegistryStats, store_errors: u64) {
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
    counter!(names::MEMBERS_DROPPED_TOTAL).absolute(stats.dropped_members);
    counter!(names::STORE_ERRORS_TOTAL).absolute(store_errors);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter() {
        // no recorder installed: every call is a no-op
        let _guard = ConnectionMetricsGuard::new();
        record_message(12, "inbound");
        record_event("message");
        record_hub_stats(&RegistryStats::default(), 0);
        record_error("websocket");
    }
}
