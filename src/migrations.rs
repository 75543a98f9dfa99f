use clickhouse::Client;

/// System database holding the backfill task table.
pub const SYSTEM_DATABASE: &str = "drift_system";

/// Ordered DDL for the system database. Every statement is idempotent
/// (`IF NOT EXISTS`) so safe to run on every startup.
const SYSTEM_MIGRATIONS: &[&str] = &[
    "CREATE DATABASE IF NOT EXISTS drift_system",

    // Task rows are never updated in place: each state change is a full-row
    // insert with a newer updated_at, folded by the replacing merge. Readers
    // use FINAL.
    r"CREATE TABLE IF NOT EXISTS drift_system.backfill_tasks
(
    id                  String,
    workspace_id        LowCardinality(String),
    status              LowCardinality(String),
    lookback_days       UInt32,
    chunk_size_days     UInt32,
    batch_size          UInt32,
    total_sessions      UInt64,
    processed_sessions  UInt64,
    total_events        UInt64,
    processed_events    UInt64,
    current_date_chunk  String,
    created_at          DateTime64(3, 'UTC'),
    updated_at          DateTime64(3, 'UTC'),
    started_at          DateTime64(3, 'UTC'),
    completed_at        DateTime64(3, 'UTC'),
    error_message       String,
    retry_count         UInt32,
    filters_snapshot    String
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY id
SETTINGS index_granularity = 8192",
];

/// Per-workspace analytics schema. The events table folds duplicate
/// submissions by (dedup_token, max _version); sessions and goals are
/// materialized from it (views owned by the warehouse deploy, not this
/// service) and fold by (key, max updated_at).
pub fn workspace_migrations(database: &str) -> Vec<String> {
    vec![
        format!("CREATE DATABASE IF NOT EXISTS {database}"),
        format!(
            r"CREATE TABLE IF NOT EXISTS {database}.events
(
    session_id          String,
    workspace_id        LowCardinality(String),
    name                LowCardinality(String),
    dedup_token         String,
    `_version`          DateTime64(3, 'UTC'),
    received_at         DateTime64(3, 'UTC'),
    created_at          DateTime64(3, 'UTC'),
    updated_at          DateTime64(3, 'UTC'),
    user_id             String,
    sdk_version         LowCardinality(String),
    referrer            String,
    referrer_domain     String,
    referrer_path       String,
    is_direct           Bool,
    landing_page        String,
    landing_page_domain String,
    landing_page_path   String,
    utm_source          String,
    utm_medium          String,
    utm_campaign        String,
    utm_term            String,
    utm_content         String,
    utm_id              String,
    utm_id_from         String,
    channel             LowCardinality(String),
    channel_group       LowCardinality(String),
    device              LowCardinality(String),
    browser             LowCardinality(String),
    browser_type        LowCardinality(String),
    os                  LowCardinality(String),
    user_agent          String,
    connection_type     LowCardinality(String),
    language            LowCardinality(String),
    timezone            LowCardinality(String),
    screen_width        UInt16,
    screen_height       UInt16,
    viewport_width      UInt16,
    viewport_height     UInt16,
    country             LowCardinality(String),
    region              String,
    city                String,
    latitude            Float64,
    longitude           Float64,
    stm_1               String,
    stm_2               String,
    stm_3               String,
    stm_4               String,
    stm_5               String,
    stm_6               String,
    stm_7               String,
    stm_8               String,
    stm_9               String,
    stm_10              String,
    path                String,
    previous_path       String,
    page_number         UInt32,
    duration            UInt32,
    page_duration       UInt32,
    max_scroll          UInt32,
    entered_at          DateTime64(3, 'UTC'),
    exited_at           DateTime64(3, 'UTC'),
    goal_name           String,
    goal_value          Float64,
    goal_timestamp      String,
    properties          String
)
ENGINE = ReplacingMergeTree(`_version`)
PARTITION BY toYYYYMMDD(created_at)
ORDER BY (session_id, dedup_token)
TTL toDateTime(created_at) + INTERVAL 7 DAY DELETE
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1"
        ),
        format!(
            r"CREATE TABLE IF NOT EXISTS {database}.sessions
(
    session_id          String,
    workspace_id        LowCardinality(String),
    created_at          DateTime64(3, 'UTC'),
    updated_at          DateTime64(3, 'UTC'),
    user_id             String,
    referrer            String,
    referrer_domain     String,
    referrer_path       String,
    is_direct           Bool,
    landing_page        String,
    landing_page_domain String,
    landing_page_path   String,
    utm_source          String,
    utm_medium          String,
    utm_campaign        String,
    utm_term            String,
    utm_content         String,
    utm_id              String,
    utm_id_from         String,
    channel             LowCardinality(String),
    channel_group       LowCardinality(String),
    device              LowCardinality(String),
    browser             LowCardinality(String),
    browser_type        LowCardinality(String),
    os                  LowCardinality(String),
    connection_type     LowCardinality(String),
    language            LowCardinality(String),
    timezone            LowCardinality(String),
    country             LowCardinality(String),
    region              String,
    city                String,
    stm_1               String,
    stm_2               String,
    stm_3               String,
    stm_4               String,
    stm_5               String,
    stm_6               String,
    stm_7               String,
    stm_8               String,
    stm_9               String,
    stm_10              String,
    entry_path          String,
    exit_path           String,
    pageviews           UInt32,
    duration            UInt32,
    is_bounce           Bool
)
ENGINE = ReplacingMergeTree(updated_at)
PARTITION BY toYYYYMM(created_at)
ORDER BY (session_id)
SETTINGS index_granularity = 8192"
        ),
        format!(
            r"CREATE TABLE IF NOT EXISTS {database}.goals
(
    session_id          String,
    workspace_id        LowCardinality(String),
    goal_name           String,
    goal_timestamp      String,
    goal_value          Float64,
    properties          String,
    path                String,
    created_at          DateTime64(3, 'UTC'),
    updated_at          DateTime64(3, 'UTC'),
    utm_source          String,
    utm_medium          String,
    utm_campaign        String,
    utm_term            String,
    utm_content         String,
    utm_id              String,
    utm_id_from         String,
    referrer_domain     String,
    is_direct           Bool,
    channel             LowCardinality(String),
    channel_group       LowCardinality(String),
    stm_1               String,
    stm_2               String,
    stm_3               String,
    stm_4               String,
    stm_5               String,
    stm_6               String,
    stm_7               String,
    stm_8               String,
    stm_9               String,
    stm_10              String
)
ENGINE = ReplacingMergeTree(updated_at)
PARTITION BY toYYYYMM(created_at)
ORDER BY (session_id, goal_name, goal_timestamp)
SETTINGS index_granularity = 8192"
        ),
    ]
}

/// Run the system migrations. Called once at startup.
pub async fn run(ch: &Client) -> anyhow::Result<()> {
    for sql in SYSTEM_MIGRATIONS {
        ch.query(sql).execute().await?;
    }
    tracing::info!("system migrations applied ({SYSTEM_DATABASE})");
    Ok(())
}
