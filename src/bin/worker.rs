//! The worker process entrypoint: loads `RuntimeConfig`, opens the Postgres pool, runs
//! migrations, and spawns the dispatcher's worker tasks, the reaper, and the HTTP/SSE server
//! side by side. Exit codes follow SPEC_FULL §6: 0 on graceful shutdown, 1 if the store or
//! queue cannot be reached at startup, 2 on repeated panics during job execution.

use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

use training_engine::api::{self, ApiState};
use training_engine::bar_store::BarStore;
use training_engine::config::RuntimeConfig;
use training_engine::job_store::{JobStore, PgJobStore};
use training_engine::monitoring::{self, MetricsCollector};
use training_engine::progress;
use training_engine::queue::{self, WorkerContext};
use training_engine::reaper::Reaper;

const WORKER_COUNT: usize = 4;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = monitoring::setup_tracing() {
        eprintln!("failed to initialize tracing: {e}");
        return ExitCode::from(1);
    }

    let config = match RuntimeConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    let pool = match PgPoolOptions::new().max_connections(16).connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::error!(error = %e, "failed to run migrations");
        return ExitCode::from(1);
    }

    let metrics = match MetricsCollector::new() {
        Ok(m) => Arc::new(m),
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize metrics");
            return ExitCode::from(1);
        }
    };

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let bars = Arc::new(BarStore::new(pool.clone()));
    let progress_registry = progress::new_registry();
    let cancel_flags = Arc::new(dashmap::DashMap::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let live_handles: Arc<dashmap::DashSet<String>> = Arc::new(dashmap::DashSet::new());

    let mut worker_tasks = Vec::new();
    for i in 0..WORKER_COUNT {
        let worker_handle = format!("{}-{}", hostname(), i);
        live_handles.insert(worker_handle.clone());

        let ctx = Arc::new(WorkerContext {
            pool: pool.clone(),
            store: store.clone(),
            bars: bars.clone(),
            metrics: metrics.clone(),
            progress_registry: progress_registry.clone(),
            progress_throttle: config.progress_throttle,
            heartbeat_interval: config.heartbeat_interval,
            job_timeout: config.worker_timeout,
            worker_handle,
        });
        let cancel_flags = cancel_flags.clone();
        let shutdown_rx = shutdown_rx.clone();
        worker_tasks.push(tokio::spawn(queue::run_worker(ctx, cancel_flags, shutdown_rx)));
    }

    let reaper = Arc::new(Reaper::new(store.clone(), metrics.clone(), config.stale_threshold));
    let live_handles_for_reaper = live_handles.clone();
    let reaper_task = tokio::spawn(reaper.run(
        config.reaper_interval,
        move || live_handles_for_reaper.iter().map(|h| h.clone()).collect::<HashSet<_>>(),
        shutdown_rx.clone(),
    ));

    let api_state = ApiState {
        store: store.clone(),
        bars: bars.clone(),
        progress_registry,
        cancel_flags,
        metrics: metrics.clone(),
    };
    let app = api::router(api_state);
    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.bind_addr, "failed to bind HTTP listener");
            let _ = shutdown_tx.send(true);
            return ExitCode::from(1);
        }
    };
    tracing::info!(addr = %config.bind_addr, "listening");

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    });

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining in-flight jobs");
    let _ = shutdown_tx.send(true);

    for task in worker_tasks {
        let _ = task.await;
    }
    let _ = reaper_task.await;
    let _ = server.await;

    ExitCode::from(0)
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("worker-{}", std::process::id()))
}
