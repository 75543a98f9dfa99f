use chrono::NaiveDate;
use clickhouse::Client;
use std::time::{Duration, Instant};

use crate::config::BackfillConfig;
use crate::error::BackfillError;
use crate::migrations;
use crate::models::event::TrackingEvent;

/// Database that holds one workspace's events/sessions/goals tables.
/// Workspace ids are restricted to [A-Za-z0-9_-] at creation, so the
/// derived name never needs quoting.
pub fn workspace_database(workspace_id: &str) -> String {
    format!("drift_ws_{}", workspace_id.replace('-', "_"))
}

#[derive(clickhouse::Row, serde::Deserialize)]
struct CountRow {
    count: u64,
}

/// Bulk-insert one flush batch into the workspace's events table.
pub async fn insert_events(
    ch: &Client,
    workspace_id: &str,
    events: &[TrackingEvent],
) -> Result<(), clickhouse::error::Error> {
    let table = format!("{}.events", workspace_database(workspace_id));
    let mut insert = ch.insert(&table)?;
    for event in events {
        insert.write(event).await?;
    }
    insert.end().await
}

/// Ensure the per-workspace database and tables exist. Idempotent.
pub async fn ensure_workspace_schema(ch: &Client, workspace_id: &str) -> anyhow::Result<()> {
    let database = workspace_database(workspace_id);
    for sql in migrations::workspace_migrations(&database) {
        ch.query(&sql).execute().await?;
    }
    Ok(())
}

/// Sessions + events row counts inside the lookback window, used for task
/// totals. Counts are taken without FINAL; replacing-merge duplicates are
/// rare and progress is informational.
pub async fn window_totals(
    ch: &Client,
    workspace_id: &str,
    from: NaiveDate,
) -> Result<(u64, u64), clickhouse::error::Error> {
    let db = workspace_database(workspace_id);
    let date = from.format("%Y-%m-%d");
    let sessions = ch
        .query(&format!(
            "SELECT count() AS count FROM {db}.sessions WHERE toDate(created_at) >= '{date}'"
        ))
        .fetch_one::<CountRow>()
        .await?
        .count;
    let events = ch
        .query(&format!(
            "SELECT count() AS count FROM {db}.events WHERE toDate(created_at) >= '{date}'"
        ))
        .fetch_one::<CountRow>()
        .await?
        .count;
    Ok((sessions, events))
}

pub async fn count_events_in_partition(
    ch: &Client,
    workspace_id: &str,
    day: NaiveDate,
) -> Result<u64, clickhouse::error::Error> {
    let db = workspace_database(workspace_id);
    let partition = day.format("%Y%m%d");
    let row = ch
        .query(&format!(
            "SELECT count() AS count FROM {db}.events WHERE toYYYYMMDD(created_at) = {partition}"
        ))
        .fetch_one::<CountRow>()
        .await?;
    Ok(row.count)
}

pub async fn count_sessions_on(
    ch: &Client,
    workspace_id: &str,
    day: NaiveDate,
) -> Result<u64, clickhouse::error::Error> {
    let db = workspace_database(workspace_id);
    let date = day.format("%Y-%m-%d");
    let row = ch
        .query(&format!(
            "SELECT count() AS count FROM {db}.sessions WHERE toDate(created_at) = '{date}'"
        ))
        .fetch_one::<CountRow>()
        .await?;
    Ok(row.count)
}

/// Issue a partition-scoped UPDATE mutation. The store executes these
/// asynchronously; completion is observed via `wait_for_mutations`.
pub async fn alter_update_in_partition(
    ch: &Client,
    database: &str,
    table: &str,
    set_clause: &str,
    partition: &str,
) -> Result<(), clickhouse::error::Error> {
    let sql = format!(
        "ALTER TABLE {database}.{table} UPDATE {set_clause} IN PARTITION '{partition}' WHERE 1 = 1"
    );
    tracing::debug!("mutation: {sql}");
    ch.query(&sql).execute().await
}

async fn unfinished_mutations(
    ch: &Client,
    database: &str,
    table: Option<&str>,
) -> Result<u64, clickhouse::error::Error> {
    let table_clause = match table {
        Some(t) => format!(" AND table = '{t}'"),
        None => String::new(),
    };
    let row = ch
        .query(&format!(
            "SELECT count() AS count FROM system.mutations \
             WHERE database = '{database}' AND is_done = 0{table_clause}"
        ))
        .fetch_one::<CountRow>()
        .await?;
    Ok(row.count)
}

/// Block until the workspace database has headroom for another mutation.
/// The store hard-fails somewhere around 100 unfinished mutations per
/// database; we throttle at the configured limit below that.
pub async fn ensure_mutation_capacity(
    ch: &Client,
    database: &str,
    config: &BackfillConfig,
) -> Result<(), BackfillError> {
    let started = Instant::now();
    loop {
        let unfinished = unfinished_mutations(ch, database, None).await?;
        if unfinished < config.mutation_concurrency_limit {
            return Ok(());
        }
        if started.elapsed() >= Duration::from_millis(config.capacity_timeout_ms) {
            return Err(BackfillError::CapacityTimeout {
                database: database.to_string(),
                timeout_ms: config.capacity_timeout_ms,
            });
        }
        tracing::debug!(
            "mutation capacity: {unfinished} unfinished on {database}, waiting"
        );
        tokio::time::sleep(Duration::from_millis(config.capacity_poll_ms)).await;
    }
}

/// Block until every mutation on (database, table) has finished.
pub async fn wait_for_mutations(
    ch: &Client,
    database: &str,
    table: &str,
    config: &BackfillConfig,
) -> Result<(), BackfillError> {
    let started = Instant::now();
    loop {
        let unfinished = unfinished_mutations(ch, database, Some(table)).await?;
        if unfinished == 0 {
            return Ok(());
        }
        if started.elapsed() >= Duration::from_millis(config.mutation_wait_timeout_ms) {
            return Err(BackfillError::MutationTimeout {
                database: database.to_string(),
                table: table.to_string(),
                timeout_ms: config.mutation_wait_timeout_ms,
            });
        }
        tokio::time::sleep(Duration::from_millis(config.mutation_wait_poll_ms)).await;
    }
}

/// Terminate every in-flight mutation under the workspace's database.
/// Used by cancel and shutdown; failure to kill is logged, not fatal.
pub async fn kill_workspace_mutations(ch: &Client, database: &str) {
    let sql = format!("KILL MUTATION WHERE database = '{database}'");
    if let Err(e) = ch.query(&sql).execute().await {
        tracing::warn!("kill mutations on {database} failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_database_maps_hyphens() {
        assert_eq!(workspace_database("acme-prod"), "drift_ws_acme_prod");
        assert_eq!(workspace_database("w1"), "drift_ws_w1");
    }
}
