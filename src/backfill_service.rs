use clickhouse::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::backfill_processor::{BackfillProcessor, ProcessorHandle, ProcessorRegistry};
use crate::config::BackfillConfig;
use crate::config_db::ConfigDb;
use crate::error::BackfillError;
use crate::filters::version::compute_filter_version;
use crate::models::filter::FilterDefinition;
use crate::models::task::{BackfillSummary, BackfillTask, BackfillTaskProgress, TaskStatus};
use crate::store;
use crate::task_store::{TaskStore, now_ms};

#[derive(Debug, Clone, Deserialize)]
pub struct StartBackfillRequest {
    pub lookback_days: u32,
    #[serde(default)]
    pub chunk_size_days: Option<u32>,
    /// Reserved; carried on the task row but unused by the mutation path.
    #[serde(default)]
    pub batch_size: Option<u32>,
}

/// Task lifecycle API over the backfill engine: create, cancel, observe.
/// Processing itself runs in spawned `BackfillProcessor` tasks.
pub struct BackfillService {
    ch: Client,
    tasks: TaskStore,
    db: Arc<ConfigDb>,
    processor: Arc<BackfillProcessor>,
    registry: ProcessorRegistry,
    config: BackfillConfig,
}

impl BackfillService {
    pub fn new(
        ch: Client,
        tasks: TaskStore,
        db: Arc<ConfigDb>,
        processor: Arc<BackfillProcessor>,
        registry: ProcessorRegistry,
        config: BackfillConfig,
    ) -> Self {
        Self {
            ch,
            tasks,
            db,
            processor,
            registry,
            config,
        }
    }

    /// Create a task row (pending, with the live filters snapshotted) and
    /// enqueue processing. Rejects when the workspace already has an
    /// active task.
    pub async fn start_backfill(
        &self,
        workspace_id: &str,
        request: StartBackfillRequest,
    ) -> Result<String, BackfillError> {
        if !(1..=365).contains(&request.lookback_days) {
            return Err(BackfillError::Validation(format!(
                "lookback_days {} out of range (1..=365)",
                request.lookback_days
            )));
        }
        let chunk_size_days = request.chunk_size_days.unwrap_or(1);
        if !(1..=30).contains(&chunk_size_days) {
            return Err(BackfillError::Validation(format!(
                "chunk_size_days {chunk_size_days} out of range (1..=30)"
            )));
        }

        let workspace = self
            .db
            .get_workspace(workspace_id)?
            .ok_or_else(|| BackfillError::InvalidWorkspace(workspace_id.to_string()))?;

        if let Some(active) = self.tasks.active_for_workspace(workspace_id).await? {
            return Err(BackfillError::ConflictingTask(format!(
                "{workspace_id} (task {})",
                active.id
            )));
        }

        store::ensure_workspace_schema(&self.ch, workspace_id)
            .await
            .map_err(BackfillError::ControlPlane)?;

        let filters_snapshot = serde_json::to_string(&workspace.filters)
            .map_err(|e| BackfillError::Validation(format!("unserializable filters: {e}")))?;

        let now = now_ms();
        let mut task = BackfillTask {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            status: TaskStatus::Pending.as_str().to_string(),
            lookback_days: request.lookback_days,
            chunk_size_days,
            batch_size: request.batch_size.unwrap_or(0),
            total_sessions: 0,
            processed_sessions: 0,
            total_events: 0,
            processed_events: 0,
            current_date_chunk: String::new(),
            created_at: now,
            updated_at: 0,
            started_at: 0,
            completed_at: 0,
            error_message: String::new(),
            retry_count: 0,
            filters_snapshot,
        };
        self.tasks.insert(&mut task).await?;

        let handle = ProcessorHandle::new(workspace_id);
        self.registry.insert(&task.id, handle.clone());
        let processor = self.processor.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            processor.run(task, handle).await;
        });

        tracing::info!("backfill {task_id} created for {workspace_id}");
        Ok(task_id)
    }

    /// Cooperatively cancel a task: flag the in-process run, kill the
    /// store-side mutations, and write the terminal row.
    pub async fn cancel_task(&self, task_id: &str) -> Result<(), BackfillError> {
        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| BackfillError::TaskNotFound(task_id.to_string()))?;
        if task.status().is_terminal() {
            return Err(BackfillError::AlreadyTerminal(task_id.to_string()));
        }

        if let Some(handle) = self.registry.get(task_id) {
            handle.cancel();
        }
        store::kill_workspace_mutations(&self.ch, &store::workspace_database(&task.workspace_id))
            .await;

        task.set_status(TaskStatus::Cancelled);
        task.completed_at = now_ms();
        self.tasks.insert_with_retry(&mut task).await;
        tracing::info!("backfill {task_id} cancelled");
        Ok(())
    }

    pub async fn get_task_status(
        &self,
        task_id: &str,
    ) -> Result<BackfillTaskProgress, BackfillError> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| BackfillError::TaskNotFound(task_id.to_string()))?;
        Ok(task.to_progress(now_ms()))
    }

    /// All tasks of a workspace, newest first.
    pub async fn list_tasks(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<BackfillTaskProgress>, BackfillError> {
        let now = now_ms();
        let tasks = self.tasks.list_for_workspace(workspace_id).await?;
        Ok(tasks.into_iter().map(|t| t.to_progress(now)).collect())
    }

    /// Needs-backfill decision: compare the live filter version with the
    /// version captured by the last completed task's snapshot.
    pub async fn get_backfill_summary(
        &self,
        workspace_id: &str,
    ) -> Result<BackfillSummary, BackfillError> {
        let workspace = self
            .db
            .get_workspace(workspace_id)?
            .ok_or_else(|| BackfillError::InvalidWorkspace(workspace_id.to_string()))?;
        let current_filter_version = compute_filter_version(&workspace.filters);

        let last_completed_filter_version = self
            .tasks
            .last_completed_for_workspace(workspace_id)
            .await?
            .map(|t| {
                let snapshot: Vec<FilterDefinition> =
                    serde_json::from_str(&t.filters_snapshot).unwrap_or_default();
                compute_filter_version(&snapshot)
            });

        let active_task = self
            .tasks
            .active_for_workspace(workspace_id)
            .await?
            .map(|t| t.to_progress(now_ms()));

        let needs_backfill = needs_backfill(
            &current_filter_version,
            last_completed_filter_version.as_deref(),
        );

        Ok(BackfillSummary {
            needs_backfill,
            current_filter_version,
            last_completed_filter_version,
            active_task,
        })
    }

    /// Crash recovery: after a short grace period for startup races, fail
    /// every `running` task whose last write predates the staleness
    /// threshold. Their workspaces accept new backfills again.
    pub fn spawn_stale_recovery(self: &Arc<Self>) {
        let service = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let threshold = Duration::from_secs(service.config.stale_threshold_minutes * 60);
            match service.tasks.stale_running(threshold).await {
                Ok(stale) => {
                    for mut task in stale {
                        // A task still owned by this process is not stale.
                        if service.registry.get(&task.id).is_some() {
                            continue;
                        }
                        tracing::warn!(
                            "backfill {}: stale (last write {}), failing",
                            task.id,
                            task.updated_at
                        );
                        task.set_status(TaskStatus::Failed);
                        task.error_message =
                            "Task stale - recovered on service restart".to_string();
                        service.tasks.insert_with_retry(&mut task).await;
                    }
                }
                Err(e) => {
                    tracing::error!("stale task recovery failed: {e}");
                }
            }
        });
    }

    /// Graceful shutdown: cancel every in-process run, kill their
    /// store-side mutations (5 s aggregate timeout), and mark the tasks
    /// cancelled.
    pub async fn shutdown(&self) {
        let running = self.registry.all();
        if running.is_empty() {
            return;
        }
        tracing::info!("backfill shutdown: cancelling {} task(s)", running.len());

        for (_, handle) in &running {
            handle.cancel();
        }

        let mut databases: Vec<String> = running
            .iter()
            .map(|(_, h)| store::workspace_database(&h.workspace_id))
            .collect();
        databases.sort();
        databases.dedup();
        let kills = databases
            .iter()
            .map(|db| store::kill_workspace_mutations(&self.ch, db));
        if tokio::time::timeout(
            Duration::from_secs(5),
            futures_util::future::join_all(kills),
        )
        .await
        .is_err()
        {
            tracing::warn!("backfill shutdown: kill mutations timed out");
        }

        for (task_id, _) in &running {
            match self.tasks.get(task_id).await {
                Ok(Some(mut task)) if task.status().is_active() => {
                    task.set_status(TaskStatus::Cancelled);
                    task.completed_at = now_ms();
                    task.error_message = "Service shutdown".to_string();
                    self.tasks.insert_with_retry(&mut task).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("backfill shutdown: could not read task {task_id}: {e}");
                }
            }
        }
    }
}

/// Historical data is consistent only when a completed backfill exists and
/// its snapshot hashes to the live configuration.
fn needs_backfill(current_version: &str, last_completed_version: Option<&str>) -> bool {
    match last_completed_version {
        None => true,
        Some(last) => last != current_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_backfill_until_versions_match() {
        assert!(needs_backfill("aaaa1111", None));
        assert!(needs_backfill("aaaa1111", Some("bbbb2222")));
        assert!(!needs_backfill("aaaa1111", Some("aaaa1111")));
    }

    #[test]
    fn request_deserializes_with_optional_fields() {
        let req: StartBackfillRequest =
            serde_json::from_value(serde_json::json!({ "lookback_days": 30 })).unwrap();
        assert_eq!(req.lookback_days, 30);
        assert_eq!(req.chunk_size_days, None);
        assert_eq!(req.batch_size, None);

        let req: StartBackfillRequest = serde_json::from_value(serde_json::json!({
            "lookback_days": 90, "chunk_size_days": 7, "batch_size": 500
        }))
        .unwrap();
        assert_eq!(req.chunk_size_days, Some(7));
        assert_eq!(req.batch_size, Some(500));
    }
}
