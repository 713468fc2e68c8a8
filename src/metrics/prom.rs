use lazy_static::lazy_static;
use prometheus::{labels, register_gauge, Gauge};
use tracing::{info, warn};

use sitecheck::RunSummary;

lazy_static! {
    static ref SITECHECK_HOSTS_PROBED: Gauge =
        register_gauge!("sitecheck_hosts_probed", "hosts probed in the last run").unwrap();
    static ref SITECHECK_HOSTS_REACHABLE: Gauge =
        register_gauge!("sitecheck_hosts_reachable", "hosts answering over HTTP").unwrap();
    static ref SITECHECK_CERTIFICATES_RETRIEVED: Gauge = register_gauge!(
        "sitecheck_certificates_retrieved",
        "hosts whose certificate was read"
    )
    .unwrap();
    static ref SITECHECK_PROBE_ERRORS: Gauge =
        register_gauge!("sitecheck_probe_errors", "hosts with a failed probe phase").unwrap();
    static ref SITECHECK_BATCHES: Gauge =
        register_gauge!("sitecheck_batches", "batches dispatched").unwrap();
}

/// Function to push run totals to prometheus
/// # Arguments
/// * `summary` - Totals of the finished run
/// * `prometheus_address` - Push gateway base address
pub fn prometheus_metrics(summary: &RunSummary, prometheus_address: &str) {
    SITECHECK_HOSTS_PROBED.set(summary.probed as f64);
    SITECHECK_HOSTS_REACHABLE.set(summary.reachable as f64);
    SITECHECK_CERTIFICATES_RETRIEVED.set(summary.certificates as f64);
    SITECHECK_PROBE_ERRORS.set(summary.errors as f64);
    SITECHECK_BATCHES.set(summary.batches as f64);

    let metric_families = prometheus::gather();
    let prometheus_client = prometheus::push_metrics(
        "sitecheck",
        labels! {
            "instance".to_owned() => "sitecheck".to_owned(),
        },
        &format!("{}/metrics/job", prometheus_address),
        metric_families,
        None,
    );

    match prometheus_client {
        Ok(_) => info!("pushed run metrics to {}", prometheus_address),
        Err(e) => warn!("Failed to push metrics to prometheus: {}", e),
    }
}
