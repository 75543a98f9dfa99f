use axum::{Router, routing::get, routing::post};
use clickhouse::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use drift_ingest::AppState;
use drift_ingest::backfill_processor::{BackfillProcessor, ProcessorRegistry, WorkspaceLeases};
use drift_ingest::backfill_service::BackfillService;
use drift_ingest::config::DriftConfig;
use drift_ingest::config_db::ConfigDb;
use drift_ingest::event_buffer::{ClickHouseSink, EventBuffer};
use drift_ingest::filter_service::FilterService;
use drift_ingest::geo::DisabledGeoResolver;
use drift_ingest::handlers;
use drift_ingest::migrations;
use drift_ingest::session_ingest::SessionIngestor;
use drift_ingest::task_store::TaskStore;
use drift_ingest::workspace_cache::WorkspaceCache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("drift_ingest=debug,tower_http=debug")
        }))
        .init();

    let clickhouse_url =
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_user =
        std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    let ch = Client::default()
        .with_url(&clickhouse_url)
        .with_user(&clickhouse_user)
        .with_password(&clickhouse_password);

    let mut config = DriftConfig::load(
        std::env::var("DRIFT_CONFIG").unwrap_or_else(|_| "./drift.toml".to_string()),
    )?;
    config.apply_env_overrides();

    migrations::run(&ch).await?;

    let config_db_path =
        std::env::var("DRIFT_CONFIG_DB").unwrap_or_else(|_| "./drift_config.db".to_string());
    let config_db = Arc::new(ConfigDb::open(&config_db_path)?);
    tracing::info!("config db opened at {config_db_path}");

    let cache = Arc::new(WorkspaceCache::new(
        config_db.clone(),
        Duration::from_secs(config.cache.workspace_ttl_secs),
    ));
    let filter_service = Arc::new(FilterService::new(config_db.clone()));
    cache.spawn_invalidator(filter_service.subscribe());

    let buffer = EventBuffer::new(
        Arc::new(ClickHouseSink::new(ch.clone())),
        config.buffer.clone(),
    );
    let ingest = Arc::new(SessionIngestor::new(
        cache.clone(),
        buffer.clone(),
        Arc::new(DisabledGeoResolver),
    ));

    let tasks = TaskStore::new(ch.clone());
    let registry = ProcessorRegistry::default();
    let processor = Arc::new(BackfillProcessor::new(
        ch.clone(),
        tasks.clone(),
        WorkspaceLeases::default(),
        registry.clone(),
        config.backfill.clone(),
    ));
    let backfill = Arc::new(BackfillService::new(
        ch.clone(),
        tasks,
        config_db.clone(),
        processor,
        registry,
        config.backfill.clone(),
    ));
    backfill.spawn_stale_recovery();

    let state = AppState {
        ch,
        config_db,
        cache,
        ingest,
        filters: filter_service,
        backfill: backfill.clone(),
    };

    let app = Router::new()
        // Ingest
        .route("/api/v1/ingest/session", post(handlers::ingest::ingest_session))
        // Workspaces
        .route("/api/v1/workspaces", post(handlers::workspaces::create_workspace))
        .route(
            "/api/v1/workspaces/{id}",
            get(handlers::workspaces::get_workspace),
        )
        // Filters
        .route(
            "/api/v1/workspaces/{id}/filters",
            get(handlers::filters::get_filters).put(handlers::filters::replace_filters),
        )
        // Backfill
        .route("/api/v1/backfills", post(handlers::backfill::start_backfill))
        .route(
            "/api/v1/backfills/{task_id}",
            get(handlers::backfill::get_task_status),
        )
        .route(
            "/api/v1/backfills/{task_id}/cancel",
            post(handlers::backfill::cancel_task),
        )
        .route(
            "/api/v1/workspaces/{id}/backfills",
            get(handlers::backfill::list_tasks),
        )
        .route(
            "/api/v1/workspaces/{id}/backfill-summary",
            get(handlers::backfill::get_summary),
        )
        // Health
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("drift-ingest-api listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await?;

    // Drain what the handlers accepted before the process exits.
    backfill.shutdown().await;
    buffer.shutdown().await;
    tracing::info!("drift-ingest-api stopped");

    Ok(())
}
