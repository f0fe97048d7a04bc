use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "roomkeep_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "roomkeep_request_duration_seconds";

/// Counter: reservation attempts turned down by the conflict engine. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "roomkeep_reservations_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomkeep_connections_rejected_total";

/// Counter: requests carrying a bad token.
pub const AUTH_FAILURES_TOTAL: &str = "roomkeep_auth_failures_total";

/// Histogram: reservation WAL group-commit batch size (records per flush).
pub const RESERVATION_WAL_BATCH_SIZE: &str = "roomkeep_reservation_wal_batch_size";

/// Histogram: room WAL group-commit batch size (records per flush).
pub const ROOM_WAL_BATCH_SIZE: &str = "roomkeep_room_wal_batch_size";

// ── Event flow ──────────────────────────────────────────────────

/// Counter: lifecycle events accepted by the channel. Labels: event_type.
pub const EVENTS_PUBLISHED_TOTAL: &str = "roomkeep_events_published_total";

/// Counter: lifecycle events lost at publish time. Labels: event_type.
pub const EVENTS_DROPPED_TOTAL: &str = "roomkeep_events_dropped_total";

/// Counter: deliveries the cascade consumer committed. Labels: event_type.
pub const CASCADE_PROCESSED_TOTAL: &str = "roomkeep_cascade_processed_total";

/// Counter: reservations removed by cascade deletion.
pub const CASCADE_RESERVATIONS_PURGED_TOTAL: &str = "roomkeep_cascade_reservations_purged_total";

/// Counter: processing failures (decode or store) in the cascade consumer.
pub const CASCADE_PROCESSING_ERRORS_TOTAL: &str = "roomkeep_cascade_processing_errors_total";

/// Counter: times the cascade consumer lost or failed to reach the channel.
pub const CASCADE_CHANNEL_ERRORS_TOTAL: &str = "roomkeep_cascade_channel_errors_total";

/// Gauge: current reconnect attempt (0 while listening).
pub const CASCADE_RETRY_ATTEMPT: &str = "roomkeep_cascade_retry_attempt";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
