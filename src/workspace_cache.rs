use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config_db::ConfigDb;
use crate::filter_service::FilterChange;
use crate::models::workspace::Workspace;

/// Read-through workspace cache in front of the control-plane store.
/// Entries expire after the configured TTL and are dropped eagerly when
/// the filter service announces a change.
pub struct WorkspaceCache {
    db: Arc<ConfigDb>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    loaded_at: Instant,
    workspace: Arc<Workspace>,
}

impl WorkspaceCache {
    pub fn new(db: Arc<ConfigDb>, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Latest view of a workspace, at most `ttl` stale.
    pub async fn get(&self, workspace_id: &str) -> anyhow::Result<Option<Arc<Workspace>>> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(workspace_id) {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok(Some(entry.workspace.clone()));
                }
            }
        }

        let Some(workspace) = self.db.get_workspace(workspace_id)? else {
            // Negative results are not cached; unknown-workspace traffic is
            // rejected upstream and should not pin memory here.
            let mut entries = self.entries.write().await;
            entries.remove(workspace_id);
            return Ok(None);
        };

        let workspace = Arc::new(workspace);
        let mut entries = self.entries.write().await;
        entries.insert(
            workspace_id.to_string(),
            CacheEntry {
                loaded_at: Instant::now(),
                workspace: workspace.clone(),
            },
        );
        Ok(Some(workspace))
    }

    pub async fn invalidate(&self, workspace_id: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(workspace_id);
    }

    /// Consume the filter-change stream and drop affected entries so the
    /// next ingest sees the new configuration immediately instead of after
    /// TTL expiry.
    pub fn spawn_invalidator(self: &Arc<Self>, mut rx: broadcast::Receiver<FilterChange>) {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        tracing::debug!(
                            "filters changed for {}, invalidating cache",
                            change.workspace_id
                        );
                        cache.invalidate(&change.workspace_id).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed events: safest to drop everything.
                        tracing::warn!("filter change stream lagged by {skipped}, clearing cache");
                        let mut entries = cache.entries.write().await;
                        entries.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workspace::WorkspaceSettings;

    fn db_with_workspace() -> Arc<ConfigDb> {
        let db = ConfigDb::open_in_memory().unwrap();
        db.create_workspace("w1", "W", "UTC", &WorkspaceSettings::default())
            .unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let db = db_with_workspace();
        let cache = WorkspaceCache::new(db.clone(), Duration::from_secs(60));
        let first = cache.get("w1").await.unwrap().unwrap();

        // Mutate behind the cache; the stale entry is still served.
        db.replace_filters("w1", &[]).unwrap();
        let second = cache.get("w1").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let db = db_with_workspace();
        let cache = WorkspaceCache::new(db.clone(), Duration::from_secs(60));
        let first = cache.get("w1").await.unwrap().unwrap();
        cache.invalidate("w1").await;
        let second = cache.get("w1").await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn unknown_workspace_is_none() {
        let db = db_with_workspace();
        let cache = WorkspaceCache::new(db, Duration::from_secs(60));
        assert!(cache.get("missing").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_reloads() {
        let db = db_with_workspace();
        let cache = WorkspaceCache::new(db, Duration::from_secs(60));
        let first = cache.get("w1").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        let second = cache.get("w1").await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
