use anyhow::Result;
use arena_core::{AppConfig, Core, CoreBuilder, DatabasePort, ScoreSum, WorkerPool};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use bc_single_instance::BcSingleInstance;
use db_postgres::PgDb;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use queue_redis::{RedisLock, RedisQueue};
use sandbox_docker::DockerSandbox;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_error::ErrorLayer;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

fn init_tracing_bunyan() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Name identifies the service in log streams
    let formatting_layer = BunyanFormattingLayer::new(
        "bot-arena".into(),
        std::io::stdout, // single sink: JSON to stdout; no other outputs supported
    );

    // Build a Bunyan-only subscriber:
    // - JsonStorageLayer: propagates span fields to child events
    // - BunyanFormattingLayer: strict Bunyan JSON output
    // - ErrorLayer: enrich errors with span context
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
        .with(ErrorLayer::default());

    // Set as the single global subscriber (no fallback to fmt/console)
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    core: Arc<Core>,
    metrics: Option<PrometheusHandle>,
}

// --- /health (service liveness) ---
#[instrument(name = "health")]
async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// --- /health/db (database readiness) ---
#[derive(Serialize)]
struct DbStatus {
    db: &'static str,
}

#[instrument(name = "health_db", skip(app_state))]
async fn health_db(State(app_state): State<AppState>) -> impl IntoResponse {
    match app_state.core.database.ping_db().await {
        Ok(_) => (StatusCode::OK, axum::Json(DbStatus { db: "ok" })),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(DbStatus { db: "down" }),
        ),
    }
}

// --- /metrics (prometheus text format) ---
async fn metrics(State(app_state): State<AppState>) -> impl IntoResponse {
    match &app_state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}

async fn run_leaderboard_refresher(
    database: Arc<dyn DatabasePort>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick completes immediately, skip it
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // readers keep serving the previous projection on failure
        if let Err(e) = database.refresh_leaderboards().await {
            warn!(error = %e, "leaderboard_refresh_failed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("ctrl_c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // Load .env first if present; ignore if missing (Docker sets envs)
    dotenvy::dotenv().ok();
    // map all log! calls in dependencies to tracing
    LogTracer::init()?;
    // Initialize Bunyan-only tracing before constructing anything else.
    init_tracing_bunyan()?;

    // invalid configuration refuses to start
    let config = AppConfig::from_env()?;

    let metrics_handle = if config.metrics.enabled {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    // adapters
    let db = PgDb::new(&config.database_url, config.database_pool_size).await?;
    db.run_migration().await?;
    let queue = RedisQueue::new(&config.queue.backing_address, config.queue.pool_size).await?;
    let lock = RedisLock::new(&config.queue.backing_address).await?;
    let sandbox = DockerSandbox::new(config.executor.clone(), config.programs.clone())?;

    let core = Arc::new(
        CoreBuilder::new()
            .set_db(Arc::new(db))
            .set_queue(Arc::new(queue))
            .set_sandbox(Arc::new(sandbox))
            .set_broadcast(Arc::new(BcSingleInstance::new()))
            .set_lock(Arc::new(lock))
            .build(),
    );
    let shutdown = CancellationToken::new();

    // reclaim orphaned work before consuming new work
    let recovery = Arc::new(core.recovery(&config));
    let report = recovery.recover_on_startup().await?;
    info!(
        reclaimed = report.reclaimed,
        enqueued = report.enqueued,
        "startup recovery finished"
    );

    let processor = Arc::new(core.processor(&config, Arc::new(ScoreSum)));
    let pool = WorkerPool::new(
        processor,
        core.queue.clone(),
        config.worker.clone(),
        shutdown.child_token(),
    );
    WorkerPool::start(&pool);
    tokio::spawn(Arc::clone(&pool).run_autoscaler());
    tokio::spawn(Arc::clone(&pool).run_gauge_sampler());
    tokio::spawn(Arc::clone(&recovery).run_periodic(shutdown.child_token()));
    tokio::spawn(run_leaderboard_refresher(
        core.database.clone(),
        config.leaderboard_refresh_interval,
        shutdown.child_token(),
    ));

    let app_state = AppState {
        core: core.clone(),
        metrics: metrics_handle,
    };
    let app = Router::new()
        .route("/health", get(health))
        .route("/health/db", get(health_db))
        .route("/metrics", get(metrics))
        .with_state(app_state);

    let addr = format!("0.0.0.0:{}", config.metrics.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening on http server");
    let http_shutdown = shutdown.child_token();
    let http = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(http_shutdown.cancelled_owned())
            .await
    });

    shutdown_signal().await;
    info!("shutdown signal received, draining");

    // drain order: stop consuming, finish in-flight matches, stop the rest
    shutdown.cancel();
    pool.drain().await;
    let _ = http.await;
    info!(
        processed = pool.matches_processed(),
        failed = pool.matches_failed(),
        "bye"
    );
    Ok(())
}
