//! Composition root. Loads config, builds every core service via
//! [`auris_app::AppState::build`], and runs the background task graph:
//! the extraction queue worker, the conversation cache sweeper, the
//! plugin resource monitor, and the periodic memory summarization cycle.
//! Grounded on `skynet-gateway::main` (config load → construct → spawn),
//! with the HTTP/WS server removed — that surface is out of scope here.

use std::sync::Arc;
use std::time::Duration;

use auris_app::AppState;
use auris_core::config::AurisConfig;
use auris_queue::ExtractionWorker;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "auris=info".into()),
        )
        .init();

    let config_path = std::env::var("AURIS_CONFIG").ok();
    let config = AurisConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({}), using defaults", e);
        AurisConfig::default()
    });

    let state = Arc::new(AppState::build(config)?);
    info!("auris core services wired, starting background task graph");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = ExtractionWorker::new(
        state.queue_store.clone(),
        state.memory.clone(),
        state.conversation_store.clone(),
        state.events.clone(),
        state.config.queue.clone(),
    );
    let queue_task = tokio::spawn(worker.run(shutdown_rx.clone()));

    let _sweeper_task = state.cache.clone().spawn_sweeper();

    state.plugins.start_resource_monitor().await;

    let summarization_task = spawn_summarization_cycle(state.clone(), shutdown_rx.clone());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining task graph");
    let _ = shutdown_tx.send(true);

    if let Err(e) = queue_task.await {
        error!(error = %e, "extraction queue worker task panicked");
    }
    summarization_task.abort();
    state.plugins.shutdown().await;

    Ok(())
}

/// Runs `MemoryService::run_summarization_cycle` on the configured
/// interval until told to stop. Grounded on the same poll-until-shutdown
/// shape as `ExtractionWorker::run`, generalized from a task queue to a
/// fixed-interval maintenance cycle.
fn spawn_summarization_cycle(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(state.config.memory.summarization_interval_hours * 3600);
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match state.memory.run_summarization_cycle().await {
                        Ok(n) => info!(clusters_summarized = n, "summarization cycle completed"),
                        Err(e) => error!(error = %e, "summarization cycle failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
