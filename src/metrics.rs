//! metrics.rs — the Prometheus surface: recorder install, the `/metrics`
//! route, and the one-time description of every series the dedup gate,
//! pipeline, and coordinator emit.

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics with help
/// text even before they are first incremented).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("jobscout_admitted_total", "Items admitted through dedup.");
        describe_counter!("jobscout_duplicates_total", "Duplicate submissions detected.");
        describe_counter!("jobscout_filtered_total", "Items rejected by the pre-filter.");
        describe_counter!("jobscout_bypass_total", "Items that skipped the pre-filter.");
        describe_counter!("jobscout_analyzed_total", "Analyzer calls that returned a report.");
        describe_counter!("jobscout_matched_total", "Items persisted as matches.");
        describe_counter!("jobscout_skipped_total", "Items below the match threshold.");
        describe_counter!("jobscout_claims_total", "Exclusive claims taken by workers.");
        describe_counter!("jobscout_items_completed_total", "Items released in a terminal state.");
        describe_counter!("jobscout_items_requeued_total", "Recoverable failures requeued.");
        describe_counter!("jobscout_items_failed_total", "Items released terminally failed.");
        describe_gauge!("jobscout_queue_depth", "Claimable backlog (pending + retrying).");
        describe_gauge!("jobscout_processing_enabled", "1 when claiming, 0 when paused.");
        describe_gauge!("jobscout_workers", "Configured worker count.");
        describe_histogram!("jobscout_stage_ms", "Stage execution time in milliseconds.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder and expose a static gauge for
    /// the configured worker count.
    pub fn init(workers: usize) -> Self {
        // Use default buckets to avoid API differences across crate versions.
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        ensure_metrics_described();
        gauge!("jobscout_workers").set(workers as f64);

        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
