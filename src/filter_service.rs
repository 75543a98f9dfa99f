use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config_db::ConfigDb;
use crate::filters::version::filter_definition_version;
use crate::models::filter::FilterDefinition;

/// Announcement that a workspace's filter configuration changed. Consumed
/// by the workspace cache (eager invalidation); a backfill against the new
/// configuration is a separate, user-triggered step.
#[derive(Debug, Clone)]
pub struct FilterChange {
    pub workspace_id: String,
}

/// Owns filter mutation: validates, stamps versions, persists to the
/// control plane and broadcasts `filters.changed`.
pub struct FilterService {
    db: Arc<ConfigDb>,
    tx: broadcast::Sender<FilterChange>,
}

impl FilterService {
    pub fn new(db: Arc<ConfigDb>) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { db, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FilterChange> {
        self.tx.subscribe()
    }

    pub fn get_filters(&self, workspace_id: &str) -> anyhow::Result<Option<Vec<FilterDefinition>>> {
        self.db.get_filters(workspace_id)
    }

    /// Replace a workspace's filter list wholesale. Every definition is
    /// validated; versions and updated_at are (re)stamped server-side.
    pub fn replace_filters(
        &self,
        workspace_id: &str,
        mut filters: Vec<FilterDefinition>,
    ) -> anyhow::Result<Vec<FilterDefinition>> {
        for filter in &filters {
            if let Err(reason) = filter.validate() {
                anyhow::bail!("invalid filter: {reason}");
            }
        }
        let mut seen = std::collections::HashSet::new();
        for filter in &filters {
            if !seen.insert(filter.id.as_str()) {
                anyhow::bail!("duplicate filter id {}", filter.id);
            }
        }

        let now = Utc::now();
        for filter in &mut filters {
            let version = filter_definition_version(filter);
            if filter.version != version {
                filter.version = version;
                filter.updated_at = now;
            }
        }

        self.db.replace_filters(workspace_id, &filters)?;
        let _ = self.tx.send(FilterChange {
            workspace_id: workspace_id.to_string(),
        });
        tracing::info!(
            "filters replaced for {workspace_id}: {} definition(s)",
            filters.len()
        );
        Ok(filters)
    }
}
