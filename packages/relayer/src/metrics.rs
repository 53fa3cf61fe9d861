//! Prometheus metrics for the bridge relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};
use relay_core::{ChainRole, Reconciliation, RelayReport};

lazy_static! {
    pub static ref EVENTS_OBSERVED: CounterVec = register_counter_vec!(
        "relayer_events_observed_total",
        "Bridge events decoded from scanned windows",
        &["role"]
    ).unwrap();

    pub static ref ACTIONS: CounterVec = register_counter_vec!(
        "relayer_actions_total",
        "Relay outcomes per observed event",
        &["role", "outcome"]
    ).unwrap();

    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "relayer_latest_block",
        "Last block fully relayed",
        &["role"]
    ).unwrap();

    pub static ref UNRESOLVED_SUBMISSIONS: GaugeVec = register_gauge_vec!(
        "relayer_unresolved_submissions",
        "Submitted transactions with unknown outcome",
        &["role"]
    ).unwrap();

    pub static ref CONSECUTIVE_FAILURES: GaugeVec = register_gauge_vec!(
        "relayer_consecutive_failures",
        "Consecutive failed passes",
        &["role"]
    ).unwrap();

    pub static ref PASS_DURATION: HistogramVec = register_histogram_vec!(
        "relayer_pass_duration_seconds",
        "Time to scan and relay one window",
        &["role"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "relayer_reconciliations_total",
        "Checks of submissions whose outcome was unknown",
        &["role", "status"]
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

/// Record the outcomes of one relay pass
pub fn record_report(report: &RelayReport) {
    let role = report.role.as_str();
    EVENTS_OBSERVED
        .with_label_values(&[role])
        .inc_by(report.events.len() as f64);
    for event in &report.events {
        ACTIONS
            .with_label_values(&[role, event.outcome.as_str()])
            .inc();
    }
}

pub fn record_reconciliation(role: ChainRole, status: &Reconciliation) {
    let status = match status {
        Reconciliation::Confirmed { .. } => "confirmed",
        Reconciliation::Reverted => "reverted",
        Reconciliation::Pending => "pending",
        Reconciliation::Unknown => "unknown",
    };
    RECONCILIATIONS
        .with_label_values(&[role.as_str(), status])
        .inc();
}

pub fn record_cursor(role: ChainRole, block: u64, unresolved: usize) {
    LATEST_BLOCK
        .with_label_values(&[role.as_str()])
        .set(block as f64);
    UNRESOLVED_SUBMISSIONS
        .with_label_values(&[role.as_str()])
        .set(unresolved as f64);
}

pub fn record_pass(role: ChainRole, seconds: f64, consecutive_failures: u32) {
    PASS_DURATION
        .with_label_values(&[role.as_str()])
        .observe(seconds);
    CONSECUTIVE_FAILURES
        .with_label_values(&[role.as_str()])
        .set(consecutive_failures as f64);
}
