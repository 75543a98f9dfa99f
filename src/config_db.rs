use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;

use crate::models::filter::FilterDefinition;
use crate::models::workspace::{Workspace, WorkspaceSettings};

/// Control-plane store: workspaces and their filter definitions, kept in a
/// local SQLite file. The hot ingest path never touches this directly; it
/// reads through the workspace cache.
pub struct ConfigDb {
    conn: Mutex<Connection>,
}

impl ConfigDb {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS workspaces (
                id         TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                timezone   TEXT NOT NULL DEFAULT 'UTC',
                settings   TEXT NOT NULL DEFAULT '{}',
                filters    TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            ",
        )?;
        Ok(())
    }

    pub fn create_workspace(
        &self,
        id: &str,
        name: &str,
        timezone: &str,
        settings: &WorkspaceSettings,
    ) -> anyhow::Result<Workspace> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            anyhow::bail!("workspace id must be non-empty [A-Za-z0-9_-]");
        }
        let settings_json = serde_json::to_string(settings)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO workspaces (id, name, timezone, settings) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, timezone, settings_json],
        )?;
        drop(conn);
        self.get_workspace(id)?
            .ok_or_else(|| anyhow::anyhow!("workspace {id} vanished after insert"))
    }

    pub fn get_workspace(&self, id: &str) -> anyhow::Result<Option<Workspace>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, name, timezone, settings, filters, created_at, updated_at
                 FROM workspaces WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, timezone, settings, filters, created_at, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(Workspace {
            id,
            name,
            timezone,
            settings: serde_json::from_str(&settings).unwrap_or_default(),
            filters: serde_json::from_str(&filters).unwrap_or_default(),
            created_at,
            updated_at,
        }))
    }

    pub fn get_filters(&self, workspace_id: &str) -> anyhow::Result<Option<Vec<FilterDefinition>>> {
        let conn = self.conn.lock().unwrap();
        let filters = conn
            .query_row(
                "SELECT filters FROM workspaces WHERE id = ?1",
                params![workspace_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match filters {
            Some(json) => Ok(Some(serde_json::from_str(&json).unwrap_or_default())),
            None => Ok(None),
        }
    }

    /// Replace the full filter list of a workspace. Caller is responsible
    /// for validation and version stamping.
    pub fn replace_filters(
        &self,
        workspace_id: &str,
        filters: &[FilterDefinition],
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string(filters)?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE workspaces
             SET filters = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?1",
            params![workspace_id, json],
        )?;
        if updated == 0 {
            anyhow::bail!("workspace {workspace_id} not found");
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::filter::{
        ConditionOperator, FilterCondition, FilterOperation, OperationAction, SourceField,
        WritableDimension,
    };
    use chrono::Utc;

    #[test]
    fn workspace_round_trip() {
        let db = ConfigDb::open_in_memory().unwrap();
        let ws = db
            .create_workspace("acme-prod", "Acme", "Europe/Berlin", &WorkspaceSettings::default())
            .unwrap();
        assert_eq!(ws.id, "acme-prod");
        assert_eq!(ws.timezone, "Europe/Berlin");
        assert!(ws.filters.is_empty());

        let loaded = db.get_workspace("acme-prod").unwrap().unwrap();
        assert_eq!(loaded.name, "Acme");
        assert!(db.get_workspace("nope").unwrap().is_none());
    }

    #[test]
    fn rejects_hostile_workspace_ids() {
        let db = ConfigDb::open_in_memory().unwrap();
        assert!(
            db.create_workspace("bad id;--", "x", "UTC", &WorkspaceSettings::default())
                .is_err()
        );
        assert!(
            db.create_workspace("", "x", "UTC", &WorkspaceSettings::default())
                .is_err()
        );
    }

    #[test]
    fn filters_persist() {
        let db = ConfigDb::open_in_memory().unwrap();
        db.create_workspace("w1", "W", "UTC", &WorkspaceSettings::default())
            .unwrap();
        let filters = vec![FilterDefinition {
            id: "f1".to_string(),
            name: "fb".to_string(),
            priority: 100,
            order: 0,
            tags: vec![],
            enabled: true,
            version: "abcd1234".to_string(),
            conditions: vec![FilterCondition {
                field: SourceField::UtmSource,
                operator: ConditionOperator::Equals,
                value: Some("facebook".to_string()),
            }],
            operations: vec![FilterOperation {
                dimension: WritableDimension::Channel,
                action: OperationAction::SetValue,
                value: Some("Facebook".to_string()),
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }];
        db.replace_filters("w1", &filters).unwrap();
        let loaded = db.get_filters("w1").unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "f1");
        assert!(db.replace_filters("missing", &filters).is_err());
    }
}
