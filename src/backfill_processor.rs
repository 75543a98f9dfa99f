use chrono::{Days, NaiveDate, Utc};
use clickhouse::Client;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::BackfillConfig;
use crate::error::BackfillError;
use crate::filters::sql::compile_set_clause;
use crate::models::filter::FilterDefinition;
use crate::models::task::{BackfillTask, TaskStatus};
use crate::store;
use crate::task_store::{TaskStore, now_ms};

/// Per-workspace gate held for the duration of a processor run. A second
/// run for the same workspace awaits the gate, so two tasks can never
/// interleave mutations even if the uniqueness check at creation races.
#[derive(Clone, Default)]
pub struct WorkspaceLeases {
    inner: Arc<std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl WorkspaceLeases {
    pub async fn acquire(&self, workspace_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let gate = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            map.entry(workspace_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        gate.lock_owned().await
    }
}

/// Cooperative cancellation flag for one in-process run.
#[derive(Debug)]
pub struct ProcessorHandle {
    pub workspace_id: String,
    cancelled: AtomicBool,
}

impl ProcessorHandle {
    pub fn new(workspace_id: &str) -> Arc<Self> {
        Arc::new(Self {
            workspace_id: workspace_id.to_string(),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// task_id → handle for every processor currently running in this process.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    inner: Arc<std::sync::Mutex<HashMap<String, Arc<ProcessorHandle>>>>,
}

impl ProcessorRegistry {
    pub fn insert(&self, task_id: &str, handle: Arc<ProcessorHandle>) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.insert(task_id.to_string(), handle);
    }

    pub fn remove(&self, task_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.remove(task_id);
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<ProcessorHandle>> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.get(task_id).cloned()
    }

    pub fn all(&self) -> Vec<(String, Arc<ProcessorHandle>)> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Date chunk starts, oldest first: from `today - lookback + 1` forward in
/// steps of `chunk_size_days`, truncated at today.
pub fn date_chunks(today: NaiveDate, lookback_days: u32, chunk_size_days: u32) -> Vec<NaiveDate> {
    let start = today - Days::new(lookback_days.saturating_sub(1) as u64);
    let step = chunk_size_days.max(1) as u64;
    let mut chunks = Vec::new();
    let mut day = start;
    while day <= today {
        chunks.push(day);
        day = day + Days::new(step);
    }
    chunks
}

/// A daily events partition still exists iff it is younger than the events
/// table TTL.
pub fn events_partition_within_ttl(today: NaiveDate, day: NaiveDate, ttl_days: i64) -> bool {
    (today - day).num_days() < ttl_days
}

/// Runs one backfill task to completion: compiles the filter snapshot to
/// SQL once, then walks the date chunks issuing partition-scoped UPDATE
/// mutations under the workspace lease.
pub struct BackfillProcessor {
    ch: Client,
    tasks: TaskStore,
    leases: WorkspaceLeases,
    registry: ProcessorRegistry,
    config: BackfillConfig,
}

impl BackfillProcessor {
    pub fn new(
        ch: Client,
        tasks: TaskStore,
        leases: WorkspaceLeases,
        registry: ProcessorRegistry,
        config: BackfillConfig,
    ) -> Self {
        Self {
            ch,
            tasks,
            leases,
            registry,
            config,
        }
    }

    /// Entry point spawned by the backfill service. Owns the terminal
    /// status write for everything except external cancellation, which may
    /// also write `cancelled` (same terminal state, newer version).
    pub async fn run(&self, mut task: BackfillTask, handle: Arc<ProcessorHandle>) {
        let task_id = task.id.clone();
        let workspace_id = task.workspace_id.clone();
        tracing::info!(
            "backfill {task_id}: starting for {workspace_id} (lookback={}d chunk={}d)",
            task.lookback_days,
            task.chunk_size_days
        );

        let _lease = self.leases.acquire(&workspace_id).await;

        let result = self.process(&mut task, &handle).await;

        match result {
            Ok(()) if handle.is_cancelled() => {
                task.set_status(TaskStatus::Cancelled);
                task.completed_at = now_ms();
                self.tasks.insert_with_retry(&mut task).await;
                tracing::info!("backfill {task_id}: cancelled");
            }
            Ok(()) => {
                task.set_status(TaskStatus::Completed);
                task.completed_at = now_ms();
                self.tasks.insert_with_retry(&mut task).await;
                tracing::info!(
                    "backfill {task_id}: completed ({} sessions, {} events)",
                    task.processed_sessions,
                    task.processed_events
                );
            }
            Err(e) if handle.is_cancelled() => {
                // Errors raised while tearing down a cancelled run (killed
                // mutations, closed connections) are not failures.
                task.set_status(TaskStatus::Cancelled);
                task.completed_at = now_ms();
                self.tasks.insert_with_retry(&mut task).await;
                tracing::info!("backfill {task_id}: cancelled ({e})");
            }
            Err(e) => {
                task.set_status(TaskStatus::Failed);
                task.error_message = e.to_string();
                self.tasks.insert_with_retry(&mut task).await;
                tracing::error!("backfill {task_id}: failed: {e}");
            }
        }

        self.registry.remove(&task_id);
    }

    async fn process(
        &self,
        task: &mut BackfillTask,
        handle: &ProcessorHandle,
    ) -> Result<(), BackfillError> {
        let filters: Vec<FilterDefinition> = serde_json::from_str(&task.filters_snapshot)
            .map_err(|e| BackfillError::Validation(format!("bad filters snapshot: {e}")))?;
        let compiled = compile_set_clause(&filters);

        let today = Utc::now().date_naive();
        let chunks = date_chunks(today, task.lookback_days, task.chunk_size_days);
        let window_start = today - Days::new(task.lookback_days.saturating_sub(1) as u64);

        let (total_sessions, total_events) =
            store::window_totals(&self.ch, &task.workspace_id, window_start).await?;
        task.total_sessions = total_sessions;
        task.total_events = total_events;
        task.set_status(TaskStatus::Running);
        task.started_at = now_ms();
        self.tasks.insert_with_retry(task).await;

        let Some(compiled) = compiled else {
            tracing::info!(
                "backfill {}: snapshot compiles to no branches, nothing to update",
                task.id
            );
            return Ok(());
        };
        tracing::debug!(
            "backfill {}: SET touches [{}] over {} chunk(s)",
            task.id,
            compiled.dimensions.join(", "),
            chunks.len()
        );

        let database = store::workspace_database(&task.workspace_id);
        // `updated_at` must move on every row the mutation touches: the
        // sessions/goals merge picks max(updated_at), and a stale stamp
        // would leave the pre-mutation version visible.
        let merge_set_clause = format!("{}, updated_at = now()", compiled.set_clause);
        let mut session_partitions_done: HashSet<String> = HashSet::new();
        let mut goal_partitions_done: HashSet<String> = HashSet::new();

        for day in chunks {
            if handle.is_cancelled() {
                return Ok(());
            }
            task.current_date_chunk = day.format("%Y-%m-%d").to_string();

            if events_partition_within_ttl(today, day, self.config.events_ttl_days) {
                let partition = day.format("%Y%m%d").to_string();
                store::ensure_mutation_capacity(&self.ch, &database, &self.config).await?;
                store::alter_update_in_partition(
                    &self.ch,
                    &database,
                    "events",
                    &compiled.set_clause,
                    &partition,
                )
                .await?;
                store::wait_for_mutations(&self.ch, &database, "events", &self.config).await?;
                let count =
                    store::count_events_in_partition(&self.ch, &task.workspace_id, day).await?;
                task.processed_events += count;
            }

            let month = day.format("%Y%m").to_string();
            if !session_partitions_done.contains(&month) {
                store::ensure_mutation_capacity(&self.ch, &database, &self.config).await?;
                store::alter_update_in_partition(
                    &self.ch,
                    &database,
                    "sessions",
                    &merge_set_clause,
                    &month,
                )
                .await?;
                store::wait_for_mutations(&self.ch, &database, "sessions", &self.config).await?;
                session_partitions_done.insert(month.clone());
            }

            // Goals mirror the sessions partitioning and merge discipline.
            if !goal_partitions_done.contains(&month) {
                store::ensure_mutation_capacity(&self.ch, &database, &self.config).await?;
                store::alter_update_in_partition(
                    &self.ch,
                    &database,
                    "goals",
                    &merge_set_clause,
                    &month,
                )
                .await?;
                store::wait_for_mutations(&self.ch, &database, "goals", &self.config).await?;
                goal_partitions_done.insert(month);
            }

            let sessions_on_day = store::count_sessions_on(&self.ch, &task.workspace_id, day).await?;
            task.processed_sessions += sessions_on_day;

            if !handle.is_cancelled() {
                self.tasks.insert_with_retry(task).await;
            }
        }

        Ok(())
    }
}
