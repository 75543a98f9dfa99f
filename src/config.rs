use serde::Deserialize;
use std::path::Path;

/// Top-level service config loaded from `drift.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DriftConfig {
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// One-shot flush timer started when a workspace queue goes non-empty.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Queue length that triggers an immediate flush.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    2000
}

fn default_max_buffer_size() -> usize {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    /// Running tasks whose last write is older than this are failed on
    /// startup. Overridable via BACKFILL_STALE_THRESHOLD_MINUTES.
    #[serde(default = "default_stale_threshold_minutes")]
    pub stale_threshold_minutes: u64,
    /// The store's hard ceiling is 100 unfinished mutations per database;
    /// we throttle well below it.
    #[serde(default = "default_mutation_concurrency_limit")]
    pub mutation_concurrency_limit: u64,
    #[serde(default = "default_capacity_poll_ms")]
    pub capacity_poll_ms: u64,
    #[serde(default = "default_capacity_timeout_ms")]
    pub capacity_timeout_ms: u64,
    #[serde(default = "default_mutation_wait_poll_ms")]
    pub mutation_wait_poll_ms: u64,
    #[serde(default = "default_mutation_wait_timeout_ms")]
    pub mutation_wait_timeout_ms: u64,
    /// Daily events partitions older than this are gone (table TTL) and
    /// skipped by the chunk loop.
    #[serde(default = "default_events_ttl_days")]
    pub events_ttl_days: i64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            stale_threshold_minutes: default_stale_threshold_minutes(),
            mutation_concurrency_limit: default_mutation_concurrency_limit(),
            capacity_poll_ms: default_capacity_poll_ms(),
            capacity_timeout_ms: default_capacity_timeout_ms(),
            mutation_wait_poll_ms: default_mutation_wait_poll_ms(),
            mutation_wait_timeout_ms: default_mutation_wait_timeout_ms(),
            events_ttl_days: default_events_ttl_days(),
        }
    }
}

fn default_stale_threshold_minutes() -> u64 {
    5
}

fn default_mutation_concurrency_limit() -> u64 {
    50
}

fn default_capacity_poll_ms() -> u64 {
    500
}

fn default_capacity_timeout_ms() -> u64 {
    60_000
}

fn default_mutation_wait_poll_ms() -> u64 {
    100
}

fn default_mutation_wait_timeout_ms() -> u64 {
    60_000
}

fn default_events_ttl_days() -> i64 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Workspace cache TTL; also invalidated eagerly on filter changes.
    #[serde(default = "default_workspace_ttl_secs")]
    pub workspace_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            workspace_ttl_secs: default_workspace_ttl_secs(),
        }
    }
}

fn default_workspace_ttl_secs() -> u64 {
    60
}

impl DriftConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: DriftConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Environment overrides that operators expect to work without a
    /// config file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(minutes) = std::env::var("BACKFILL_STALE_THRESHOLD_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.backfill.stale_threshold_minutes = minutes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_constants() {
        let c = DriftConfig::default();
        assert_eq!(c.buffer.flush_interval_ms, 2000);
        assert_eq!(c.buffer.max_buffer_size, 500);
        assert_eq!(c.backfill.stale_threshold_minutes, 5);
        assert_eq!(c.backfill.mutation_concurrency_limit, 50);
        assert_eq!(c.backfill.capacity_poll_ms, 500);
        assert_eq!(c.backfill.capacity_timeout_ms, 60_000);
        assert_eq!(c.backfill.mutation_wait_poll_ms, 100);
        assert_eq!(c.backfill.events_ttl_days, 7);
        assert_eq!(c.cache.workspace_ttl_secs, 60);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: DriftConfig = toml::from_str(
            r#"
            [buffer]
            max_buffer_size = 100
            "#,
        )
        .unwrap();
        assert_eq!(c.buffer.max_buffer_size, 100);
        assert_eq!(c.buffer.flush_interval_ms, 2000);
        assert_eq!(c.backfill.mutation_concurrency_limit, 50);
    }
}
