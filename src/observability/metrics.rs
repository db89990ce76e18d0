//! Metrics collection and exposition.
//!
//! # Metrics
//! - `engine_requests_total` (counter): requests by method, status
//! - `engine_request_duration_seconds` (histogram): pipeline latency
//! - `engine_cache_lookups_total` (counter): lookups by tier, result
//! - `engine_cache_entries` (gauge): live entries per tier
//! - `engine_rate_limited_total` (counter): rejections by admission scope
//! - `engine_exceptions_total` (counter): classified failures by kind
//! - `engine_callback_errors_total` (counter): isolated lifecycle hook failures
//! - `engine_sessions_active` (gauge), `engine_sessions_pruned_total` (counter)
//!
//! Updates go through the `metrics` facade; without an installed recorder
//! they are no-ops, which keeps tests free of global setup.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "engine_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("engine_request_duration_seconds")
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(tier: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    ::metrics::counter!("engine_cache_lookups_total", "tier" => tier, "result" => result)
        .increment(1);
}

pub fn record_cache_entries(tier: &'static str, entries: usize) {
    ::metrics::gauge!("engine_cache_entries", "tier" => tier).set(entries as f64);
}

pub fn record_rate_limited(scope: &'static str) {
    ::metrics::counter!("engine_rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_exception(kind: &'static str) {
    ::metrics::counter!("engine_exceptions_total", "kind" => kind).increment(1);
}

pub fn record_callback_error(hook: &'static str) {
    ::metrics::counter!("engine_callback_errors_total", "hook" => hook).increment(1);
}

pub fn record_sessions_active(count: usize) {
    ::metrics::gauge!("engine_sessions_active").set(count as f64);
}

pub fn record_sessions_pruned(count: usize) {
    ::metrics::counter!("engine_sessions_pruned_total").increment(count as u64);
}
