use clickhouse::Row;
use serde::{Deserialize, Serialize};

/// Backfill task state machine: pending → running → terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

/// Authoritative row for one backfill run. Lives in a ReplacingMergeTree
/// keyed on `id` and versioned by `updated_at`: every state change is a
/// full-row INSERT with a newer `updated_at`, and readers qualify with
/// FINAL to see the latest version.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct BackfillTask {
    pub id: String,
    pub workspace_id: String,
    pub status: String,
    pub lookback_days: u32,
    pub chunk_size_days: u32,
    /// Reserved; accepted and surfaced but unused by the partition-scoped
    /// mutation path.
    pub batch_size: u32,
    pub total_sessions: u64,
    pub processed_sessions: u64,
    pub total_events: u64,
    pub processed_events: u64,
    pub current_date_chunk: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// 0 until the task enters `running`.
    pub started_at: i64,
    /// 0 until the task reaches a terminal state.
    pub completed_at: i64,
    pub error_message: String,
    pub retry_count: u32,
    /// Serialized FilterDefinition[] captured at creation; the run applies
    /// this snapshot, not the live workspace filters.
    pub filters_snapshot: String,
}

impl BackfillTask {
    pub fn status(&self) -> TaskStatus {
        TaskStatus::parse(&self.status).unwrap_or(TaskStatus::Failed)
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status.as_str().to_string();
    }

    /// Progress projection surfaced over the API: sessions weigh 70%,
    /// events 30%.
    pub fn to_progress(&self, now_ms: i64) -> BackfillTaskProgress {
        let sessions_ratio = ratio(self.processed_sessions, self.total_sessions);
        let events_ratio = ratio(self.processed_events, self.total_events);
        let progress_percent =
            (100.0 * (0.7 * sessions_ratio + 0.3 * events_ratio)).round() as u32;

        let estimated_remaining_seconds = if self.processed_sessions >= 1
            && self.started_at > 0
            && self.status() == TaskStatus::Running
        {
            let elapsed_secs = ((now_ms - self.started_at).max(1) as f64) / 1000.0;
            let rate = self.processed_sessions as f64 / elapsed_secs;
            let remaining = self.total_sessions.saturating_sub(self.processed_sessions) as f64;
            Some((remaining / rate).round() as u64)
        } else {
            None
        };

        BackfillTaskProgress {
            task_id: self.id.clone(),
            workspace_id: self.workspace_id.clone(),
            status: self.status(),
            lookback_days: self.lookback_days,
            chunk_size_days: self.chunk_size_days,
            batch_size: self.batch_size,
            total_sessions: self.total_sessions,
            processed_sessions: self.processed_sessions,
            total_events: self.total_events,
            processed_events: self.processed_events,
            current_date_chunk: self.current_date_chunk.clone(),
            progress_percent: progress_percent.min(100),
            estimated_remaining_seconds,
            error_message: self.error_message.clone(),
            retry_count: self.retry_count,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

fn ratio(processed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (processed.min(total)) as f64 / total as f64
    }
}

/// API-facing view of a task.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillTaskProgress {
    pub task_id: String,
    pub workspace_id: String,
    pub status: TaskStatus,
    pub lookback_days: u32,
    pub chunk_size_days: u32,
    pub batch_size: u32,
    pub total_sessions: u64,
    pub processed_sessions: u64,
    pub total_events: u64,
    pub processed_events: u64,
    pub current_date_chunk: String,
    pub progress_percent: u32,
    pub estimated_remaining_seconds: Option<u64>,
    pub error_message: String,
    pub retry_count: u32,
    pub created_at: i64,
    pub started_at: i64,
    pub completed_at: i64,
}

/// Needs-backfill decision for one workspace.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillSummary {
    pub needs_backfill: bool,
    pub current_filter_version: String,
    pub last_completed_filter_version: Option<String>,
    pub active_task: Option<BackfillTaskProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> BackfillTask {
        BackfillTask {
            id: "t1".to_string(),
            workspace_id: "w1".to_string(),
            status: "running".to_string(),
            lookback_days: 30,
            chunk_size_days: 1,
            batch_size: 0,
            total_sessions: 1000,
            processed_sessions: 500,
            total_events: 4000,
            processed_events: 1000,
            current_date_chunk: "2025-07-01".to_string(),
            created_at: 1_000,
            updated_at: 2_000,
            started_at: 1_000,
            completed_at: 0,
            error_message: String::new(),
            retry_count: 0,
            filters_snapshot: "[]".to_string(),
        }
    }

    #[test]
    fn status_transitions_and_terminality() {
        assert!(TaskStatus::Pending.is_active());
        assert!(TaskStatus::Running.is_active());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert_eq!(TaskStatus::parse("running"), Some(TaskStatus::Running));
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn progress_weights_sessions_70_events_30() {
        let p = task().to_progress(61_000);
        // 0.7 * 0.5 + 0.3 * 0.25 = 0.425
        assert_eq!(p.progress_percent, 43);
    }

    #[test]
    fn eta_uses_session_rate() {
        // 500 sessions in 60s → 8.33/s → 500 remaining → 60s
        let p = task().to_progress(61_000);
        assert_eq!(p.estimated_remaining_seconds, Some(60));
    }

    #[test]
    fn no_eta_before_first_session() {
        let mut t = task();
        t.processed_sessions = 0;
        let p = t.to_progress(61_000);
        assert_eq!(p.estimated_remaining_seconds, None);
    }

    #[test]
    fn zero_totals_do_not_divide() {
        let mut t = task();
        t.total_sessions = 0;
        t.total_events = 0;
        t.processed_sessions = 0;
        t.processed_events = 0;
        let p = t.to_progress(61_000);
        assert_eq!(p.progress_percent, 0);
    }

    #[test]
    fn processed_clamped_to_total() {
        let mut t = task();
        t.processed_sessions = 2000;
        t.processed_events = 9000;
        let p = t.to_progress(61_000);
        assert_eq!(p.progress_percent, 100);
    }
}
