pub mod backfill_processor;
pub mod backfill_service;
pub mod config;
pub mod config_db;
pub mod enrich;
pub mod error;
pub mod event_buffer;
pub mod filter_service;
pub mod filters;
pub mod geo;
pub mod handlers;
pub mod migrations;
pub mod models;
pub mod session_ingest;
pub mod store;
pub mod task_store;
pub mod workspace_cache;

use clickhouse::Client;
use std::sync::Arc;

use backfill_service::BackfillService;
use config_db::ConfigDb;
use filter_service::FilterService;
use session_ingest::SessionIngestor;
use workspace_cache::WorkspaceCache;

#[derive(Clone)]
pub struct AppState {
    pub ch: Client,
    pub config_db: Arc<ConfigDb>,
    pub cache: Arc<WorkspaceCache>,
    pub ingest: Arc<SessionIngestor>,
    pub filters: Arc<FilterService>,
    pub backfill: Arc<BackfillService>,
}
