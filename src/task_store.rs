use chrono::Utc;
use clickhouse::Client;
use std::time::Duration;

use crate::filters::sql::escape;
use crate::models::task::{BackfillTask, TaskStatus};

const TASK_TABLE: &str = "drift_system.backfill_tasks";

/// Column list in struct order; reads are positional RowBinary.
const TASK_COLUMNS: &str = "id, workspace_id, status, lookback_days, chunk_size_days, \
     batch_size, total_sessions, processed_sessions, total_events, processed_events, \
     current_date_chunk, created_at, updated_at, started_at, completed_at, \
     error_message, retry_count, filters_snapshot";

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Access to the backfill task table. Writes are always full-row inserts
/// with a newer `updated_at` (replacement-merge discipline); reads qualify
/// with FINAL to observe the latest version of each row.
#[derive(Clone)]
pub struct TaskStore {
    ch: Client,
}

impl TaskStore {
    pub fn new(ch: Client) -> Self {
        Self { ch }
    }

    /// Single-attempt insert of a new row version. Bumps `updated_at` past
    /// the previous version so the merge keeps this write even when two
    /// writes land within the same millisecond.
    pub async fn insert(&self, task: &mut BackfillTask) -> Result<(), clickhouse::error::Error> {
        task.updated_at = now_ms().max(task.updated_at + 1);
        let mut insert = self.ch.insert(TASK_TABLE)?;
        insert.write(task).await?;
        insert.end().await
    }

    /// Status writes retry with exponential backoff (1, 2, 4, 8, 16 s).
    /// After the last attempt fails the error is logged as CRITICAL and
    /// control returns to the caller; stale recovery reconciles the row on
    /// the next service start. Returns whether the write landed.
    pub async fn insert_with_retry(&self, task: &mut BackfillTask) -> bool {
        const ATTEMPTS: u32 = 5;
        for attempt in 0..ATTEMPTS {
            match self.insert(task).await {
                Ok(()) => return true,
                Err(e) => {
                    if attempt + 1 == ATTEMPTS {
                        tracing::error!(
                            "CRITICAL: task {} status write failed after {ATTEMPTS} attempts: {e}",
                            task.id
                        );
                        return false;
                    }
                    let backoff = Duration::from_secs(1 << attempt);
                    tracing::warn!(
                        "task {} status write failed (attempt {}/{ATTEMPTS}), retrying in {:?}: {e}",
                        task.id,
                        attempt + 1,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        false
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<BackfillTask>, clickhouse::error::Error> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM {TASK_TABLE} FINAL WHERE id = '{}'",
            escape(task_id)
        );
        self.ch.query(&sql).fetch_optional::<BackfillTask>().await
    }

    /// The pending/running task of a workspace, if any. Creation enforces
    /// at most one.
    pub async fn active_for_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Option<BackfillTask>, clickhouse::error::Error> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM {TASK_TABLE} FINAL \
             WHERE workspace_id = '{}' AND status IN ('{}', '{}') \
             ORDER BY created_at DESC LIMIT 1",
            escape(workspace_id),
            TaskStatus::Pending.as_str(),
            TaskStatus::Running.as_str(),
        );
        self.ch.query(&sql).fetch_optional::<BackfillTask>().await
    }

    pub async fn list_for_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<BackfillTask>, clickhouse::error::Error> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM {TASK_TABLE} FINAL \
             WHERE workspace_id = '{}' ORDER BY created_at DESC",
            escape(workspace_id)
        );
        self.ch.query(&sql).fetch_all::<BackfillTask>().await
    }

    pub async fn last_completed_for_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Option<BackfillTask>, clickhouse::error::Error> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM {TASK_TABLE} FINAL \
             WHERE workspace_id = '{}' AND status = '{}' \
             ORDER BY completed_at DESC LIMIT 1",
            escape(workspace_id),
            TaskStatus::Completed.as_str(),
        );
        self.ch.query(&sql).fetch_optional::<BackfillTask>().await
    }

    /// Running tasks whose last write is older than the staleness
    /// threshold: the processor that owned them is gone.
    pub async fn stale_running(
        &self,
        threshold: Duration,
    ) -> Result<Vec<BackfillTask>, clickhouse::error::Error> {
        let cutoff = now_ms() - threshold.as_millis() as i64;
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM {TASK_TABLE} FINAL \
             WHERE status = '{}' AND updated_at < fromUnixTimestamp64Milli({cutoff})",
            TaskStatus::Running.as_str(),
        );
        self.ch.query(&sql).fetch_all::<BackfillTask>().await
    }

}
