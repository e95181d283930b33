//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lbm_config_entries_total` (counter): applied entries by action
//! - `lbm_sync_requests_total` (counter): sync requests by load balancer kind
//! - `lbm_backend_calls_total` (counter): provider calls by operation, outcome
//! - `lbm_zone_updates_total` (counter): zone updater results by outcome
//! - `lbm_watch_reopens_total` (counter): watch streams re-opened
//! - `lbm_load_balancers` (gauge): load balancers known to the manager
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_counter!("lbm_config_entries_total", "Config entries applied by action");
    describe_counter!("lbm_sync_requests_total", "Sync requests by load balancer kind");
    describe_counter!("lbm_backend_calls_total", "Provider calls by operation and outcome");
    describe_counter!("lbm_zone_updates_total", "Zone updater results by outcome");
    describe_counter!("lbm_watch_reopens_total", "Config store watches re-opened");
    describe_gauge!("lbm_load_balancers", "Load balancers known to the manager");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_config_entry(action: &'static str) {
    counter!("lbm_config_entries_total", "action" => action).increment(1);
}

pub fn record_sync_requested(kind: &'static str) {
    counter!("lbm_sync_requests_total", "kind" => kind).increment(1);
}

pub fn record_backend_call(operation: &'static str, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!("lbm_backend_calls_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}

/// `outcome` is one of `updated`, `unchanged`, `failed`.
pub fn record_zone_update(outcome: &'static str) {
    counter!("lbm_zone_updates_total", "outcome" => outcome).increment(1);
}

pub fn record_watch_reopen() {
    counter!("lbm_watch_reopens_total").increment(1);
}

pub fn set_load_balancers(count: usize) {
    gauge!("lbm_load_balancers").set(count as f64);
}
