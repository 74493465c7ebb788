//! JobScout — Binary Entrypoint
//! Boots the queue workers and the Axum HTTP server, wiring shared state,
//! policy hot reload, and the Prometheus exporter.

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use jobscout::analyzer::build_analyzer;
use jobscout::api::{create_router, AppState};
use jobscout::config::{load_profile, RuntimeConfig};
use jobscout::coordinator::{Coordinator, ProcessingControl};
use jobscout::dedup::DuplicateIndex;
use jobscout::metrics::Metrics;
use jobscout::pipeline::Pipeline;
use jobscout::policy::{start_hot_reload_thread, PolicyHandle, PolicySet};
use jobscout::store::MemoryStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("jobscout=info,pipeline=info,queue=info,dedup=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when the variables come from the host.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = RuntimeConfig::from_env();
    let profile = Arc::new(load_profile()?);

    let policies = PolicyHandle::new(PolicySet::load()?);
    start_hot_reload_thread(policies.clone());

    let store = Arc::new(MemoryStore::new());
    let analyzer = build_analyzer();
    tracing::info!(analyzer = analyzer.name(), workers = cfg.coordinator.workers, "starting");

    let metrics = Metrics::init(cfg.coordinator.workers);

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        analyzer,
        policies.clone(),
        profile,
        cfg.pipeline.clone(),
    ));

    let control = ProcessingControl::new();
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&store),
        pipeline,
        control.clone(),
        cfg.coordinator.clone(),
    ));
    let _workers = coordinator.spawn_workers();

    let state = AppState {
        store: Arc::clone(&store),
        dedup: DuplicateIndex::new(store),
        control,
        policies,
    };
    let router = create_router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
