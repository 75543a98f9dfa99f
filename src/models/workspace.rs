use serde::{Deserialize, Serialize};

use crate::models::filter::FilterDefinition;

/// A tenant as seen by the ingest/backfill core. Owned by the control
/// plane (ConfigDb); the ingest path reads it through a TTL cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub settings: WorkspaceSettings,
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
    pub created_at: String,
    pub updated_at: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default = "default_true")]
    pub geo_enabled: bool,
    #[serde(default = "default_true")]
    pub geo_store_city: bool,
    #[serde(default = "default_true")]
    pub geo_store_region: bool,
    /// Decimal places kept on stored latitude/longitude.
    #[serde(default = "default_geo_precision")]
    pub geo_coordinates_precision: u32,
    /// Seconds below which a single-page session counts as a bounce.
    #[serde(default = "default_bounce_threshold")]
    pub bounce_threshold: u32,
    /// Display names for the stm_1..stm_10 slots, keyed by slot column.
    #[serde(default)]
    pub custom_dimensions: Vec<CustomDimensionDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomDimensionDef {
    /// Slot column name, e.g. "stm_1".
    pub slot: String,
    pub name: String,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            geo_enabled: true,
            geo_store_city: true,
            geo_store_region: true,
            geo_coordinates_precision: default_geo_precision(),
            bounce_threshold: default_bounce_threshold(),
            custom_dimensions: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_geo_precision() -> u32 {
    2
}

fn default_bounce_threshold() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_from_empty_json() {
        let s: WorkspaceSettings = serde_json::from_str("{}").unwrap();
        assert!(s.geo_enabled);
        assert!(s.geo_store_city);
        assert_eq!(s.geo_coordinates_precision, 2);
        assert_eq!(s.bounce_threshold, 10);
    }
}
