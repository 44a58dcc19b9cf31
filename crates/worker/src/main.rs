//! Scholar Harvest Worker
//!
//! Processes harvest jobs from the SQS queue:
//! 1. Receives a harvest job message
//! 2. Pages through the search provider under its rate limit
//! 3. Normalizes and upserts papers and authors
//! 4. Updates the harvest session
//!
//! `harvest-worker once <query words...>` runs a single harvest into memory
//! and prints the outcome.

use anyhow::Context;
use harvest_common::config::{AppConfig, ObservabilityConfig};
use harvest_common::db::DbPool;
use harvest_common::metrics::{register_metrics, HARVEST_DURATION_BUCKETS, METRICS_PREFIX};
use harvest_common::{HarvestJobMessage, HarvestRequest, MemoryStore, Repository, SqsQueue, VERSION};
use harvest_worker::{JobRunner, QueueWorker, RateLimitedClient, RunnerConfig};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting Scholar Harvest Worker v{}", VERSION);

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("once") {
        return run_once(&config, &args[2..]).await;
    }

    init_metrics(&config.observability)?;

    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }
    let repository = Arc::new(Repository::new(db));

    let provider = RateLimitedClient::new(config.provider.clone())?;
    let runner = JobRunner::new(
        Arc::new(provider),
        repository.clone(),
        repository,
        RunnerConfig::from(&config.worker),
    );

    if config.queue.harvest_queue_url.is_none() {
        warn!("Harvest queue URL not set, waiting for shutdown signal...");
        shutdown_signal().await;
        return Ok(());
    }

    let queue = SqsQueue::new(config.queue.clone()).await?;
    let worker = QueueWorker::new(Arc::new(queue), runner, config.worker.clone());
    worker.run(shutdown_signal()).await;

    info!("Harvest worker shutting down");
    Ok(())
}

/// Single harvest against the live provider, persisted in memory
async fn run_once(config: &AppConfig, words: &[String]) -> anyhow::Result<()> {
    let query = words.join(" ");
    let request = HarvestRequest::new(Uuid::new_v4(), query).normalized();
    if let Err(e) = request.validate() {
        let e = harvest_common::AppError::from(e);
        error!(error = %e, "Invalid harvest request");
        return Err(e.into());
    }

    let store = Arc::new(MemoryStore::new());
    let provider = RateLimitedClient::new(config.provider.clone())?;
    let runner = JobRunner::new(
        Arc::new(provider),
        store.clone(),
        store.clone(),
        RunnerConfig::from(&config.worker),
    );

    let job = HarvestJobMessage {
        job_token: Uuid::new_v4().to_string(),
        session_id: None,
        request,
    };

    let outcome = runner.run(&job).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    for paper in store.papers() {
        println!("  {} ({})", paper.title, paper.url);
    }

    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_duration_seconds", METRICS_PREFIX)),
            HARVEST_DURATION_BUCKETS,
        )?
        .install()
        .context("failed to install Prometheus exporter")?;

    register_metrics();
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
