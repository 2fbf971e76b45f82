use std::net::SocketAddr;

// ── Batch lifecycle metrics ─────────────────────────────────────

/// Counter: full reloads completed.
pub const RELOADS_TOTAL: &str = "presage_reloads_total";

/// Histogram: full reload duration in seconds.
pub const RELOAD_DURATION_SECONDS: &str = "presage_reload_duration_seconds";

/// Gauge: interval timers installed by the last reload.
pub const TIMERS_INSTALLED: &str = "presage_timers_installed";

/// Gauge: reduced intervals deferred past the quota by the last reload.
pub const INTERVALS_DEFERRED: &str = "presage_intervals_deferred";

// ── Sync metrics ────────────────────────────────────────────────

/// Counter: changed intervals replaced by incremental sync.
pub const SYNC_REPLACED_TOTAL: &str = "presage_sync_replaced_total";

/// Counter: changed intervals skipped because no timer was recorded for them.
pub const SYNC_SKIPPED_TOTAL: &str = "presage_sync_skipped_total";

/// Counter: incremental syncs that fell back to a full reload on an invalid token.
pub const SYNC_FALLBACKS_TOTAL: &str = "presage_sync_fallbacks_total";

// ── Firing and contention metrics ───────────────────────────────

/// Counter: interval timers fired. Labels: outcome (presented/orphaned).
pub const FIRES_TOTAL: &str = "presage_fires_total";

/// Counter: batch operations abandoned because the lock was held.
pub const LOCK_BUSY_TOTAL: &str = "presage_lock_busy_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
