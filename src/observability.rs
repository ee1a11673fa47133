use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "wheelhouse_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "wheelhouse_http_request_duration_seconds";

/// Counter: engine errors returned to clients. Labels: code.
pub const ERRORS_TOTAL: &str = "wheelhouse_errors_total";

// ── Booking lifecycle ───────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "wheelhouse_bookings_created_total";
pub const BOOKINGS_RESCHEDULED_TOTAL: &str = "wheelhouse_bookings_rescheduled_total";
pub const BOOKINGS_CANCELLED_TOTAL: &str = "wheelhouse_bookings_cancelled_total";
pub const BOOKINGS_COMPLETED_TOTAL: &str = "wheelhouse_bookings_completed_total";

/// Counter: placements refused for lack of wheels or sessions.
pub const CAPACITY_REJECTIONS_TOTAL: &str = "wheelhouse_capacity_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: day-ledger lock waits that hit the timeout.
pub const LOCK_TIMEOUTS_TOTAL: &str = "wheelhouse_lock_timeouts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "wheelhouse_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "wheelhouse_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
