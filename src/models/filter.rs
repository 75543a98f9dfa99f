use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event columns a filter condition may read. Closed vocabulary: the SQL
/// compiler interpolates these as identifiers, so nothing outside this set
/// ever reaches a query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceField {
    UtmSource,
    UtmMedium,
    UtmCampaign,
    UtmTerm,
    UtmContent,
    UtmId,
    UtmIdFrom,
    Referrer,
    ReferrerDomain,
    ReferrerPath,
    LandingPage,
    LandingPageDomain,
    LandingPagePath,
    Path,
    Device,
    Browser,
    BrowserType,
    Os,
    UserAgent,
    ConnectionType,
    Language,
    Timezone,
    IsDirect,
}

impl SourceField {
    pub fn column(&self) -> &'static str {
        match self {
            SourceField::UtmSource => "utm_source",
            SourceField::UtmMedium => "utm_medium",
            SourceField::UtmCampaign => "utm_campaign",
            SourceField::UtmTerm => "utm_term",
            SourceField::UtmContent => "utm_content",
            SourceField::UtmId => "utm_id",
            SourceField::UtmIdFrom => "utm_id_from",
            SourceField::Referrer => "referrer",
            SourceField::ReferrerDomain => "referrer_domain",
            SourceField::ReferrerPath => "referrer_path",
            SourceField::LandingPage => "landing_page",
            SourceField::LandingPageDomain => "landing_page_domain",
            SourceField::LandingPagePath => "landing_page_path",
            SourceField::Path => "path",
            SourceField::Device => "device",
            SourceField::Browser => "browser",
            SourceField::BrowserType => "browser_type",
            SourceField::Os => "os",
            SourceField::UserAgent => "user_agent",
            SourceField::ConnectionType => "connection_type",
            SourceField::Language => "language",
            SourceField::Timezone => "timezone",
            SourceField::IsDirect => "is_direct",
        }
    }
}

/// Event columns a filter operation may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritableDimension {
    Channel,
    ChannelGroup,
    #[serde(rename = "stm_1")]
    Stm1,
    #[serde(rename = "stm_2")]
    Stm2,
    #[serde(rename = "stm_3")]
    Stm3,
    #[serde(rename = "stm_4")]
    Stm4,
    #[serde(rename = "stm_5")]
    Stm5,
    #[serde(rename = "stm_6")]
    Stm6,
    #[serde(rename = "stm_7")]
    Stm7,
    #[serde(rename = "stm_8")]
    Stm8,
    #[serde(rename = "stm_9")]
    Stm9,
    #[serde(rename = "stm_10")]
    Stm10,
    UtmSource,
    UtmMedium,
    UtmCampaign,
    UtmTerm,
    UtmContent,
    UtmId,
    UtmIdFrom,
    ReferrerDomain,
    IsDirect,
}

impl WritableDimension {
    pub fn column(&self) -> &'static str {
        match self {
            WritableDimension::Channel => "channel",
            WritableDimension::ChannelGroup => "channel_group",
            WritableDimension::Stm1 => "stm_1",
            WritableDimension::Stm2 => "stm_2",
            WritableDimension::Stm3 => "stm_3",
            WritableDimension::Stm4 => "stm_4",
            WritableDimension::Stm5 => "stm_5",
            WritableDimension::Stm6 => "stm_6",
            WritableDimension::Stm7 => "stm_7",
            WritableDimension::Stm8 => "stm_8",
            WritableDimension::Stm9 => "stm_9",
            WritableDimension::Stm10 => "stm_10",
            WritableDimension::UtmSource => "utm_source",
            WritableDimension::UtmMedium => "utm_medium",
            WritableDimension::UtmCampaign => "utm_campaign",
            WritableDimension::UtmTerm => "utm_term",
            WritableDimension::UtmContent => "utm_content",
            WritableDimension::UtmId => "utm_id",
            WritableDimension::UtmIdFrom => "utm_id_from",
            WritableDimension::ReferrerDomain => "referrer_domain",
            WritableDimension::IsDirect => "is_direct",
        }
    }

    /// stm_* slots are the workspace-defined custom dimensions; everything
    /// else is a built-in traffic-source column.
    pub fn is_custom_dimension(&self) -> bool {
        matches!(
            self,
            WritableDimension::Stm1
                | WritableDimension::Stm2
                | WritableDimension::Stm3
                | WritableDimension::Stm4
                | WritableDimension::Stm5
                | WritableDimension::Stm6
                | WritableDimension::Stm7
                | WritableDimension::Stm8
                | WritableDimension::Stm9
                | WritableDimension::Stm10
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    IsEmpty,
    IsNotEmpty,
    Regex,
}

impl ConditionOperator {
    pub fn requires_value(&self) -> bool {
        !matches!(self, ConditionOperator::IsEmpty | ConditionOperator::IsNotEmpty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    SetValue,
    UnsetValue,
    SetDefaultValue,
}

impl OperationAction {
    pub fn requires_value(&self) -> bool {
        !matches!(self, OperationAction::UnsetValue)
    }
}

/// One AND-ed predicate of a filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: SourceField,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Option<String>,
}

/// One write applied when all conditions of the owning filter match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOperation {
    pub dimension: WritableDimension,
    pub action: OperationAction,
    #[serde(default)]
    pub value: Option<String>,
}

/// A workspace classification filter: AND-ed conditions, ordered operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDefinition {
    pub id: String,
    pub name: String,
    /// 0..=1000, higher evaluated with higher precedence.
    pub priority: u32,
    /// UI ordering only.
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Deterministic hash of conditions + operations, recomputed on write.
    #[serde(default)]
    pub version: String,
    pub conditions: Vec<FilterCondition>,
    pub operations: Vec<FilterOperation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl FilterDefinition {
    /// Structural validation: every filter carries at least one condition and
    /// one operation, priorities stay in range, and values are present
    /// wherever the operator/action needs one.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("filter id must not be empty".to_string());
        }
        if self.conditions.is_empty() {
            return Err(format!("filter {}: at least one condition required", self.id));
        }
        if self.operations.is_empty() {
            return Err(format!("filter {}: at least one operation required", self.id));
        }
        if self.priority > 1000 {
            return Err(format!(
                "filter {}: priority {} out of range (0..=1000)",
                self.id, self.priority
            ));
        }
        for cond in &self.conditions {
            if cond.operator.requires_value() && cond.value.as_deref().unwrap_or("").is_empty() {
                return Err(format!(
                    "filter {}: {:?} condition on {} requires a value",
                    self.id,
                    cond.operator,
                    cond.field.column()
                ));
            }
        }
        for op in &self.operations {
            if op.action.requires_value() && op.value.is_none() {
                return Err(format!(
                    "filter {}: {:?} on {} requires a value",
                    self.id,
                    op.action,
                    op.dimension.column()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_filter() -> FilterDefinition {
        serde_json::from_value(serde_json::json!({
            "id": "f1",
            "name": "facebook",
            "priority": 100,
            "conditions": [
                { "field": "utm_source", "operator": "equals", "value": "facebook" }
            ],
            "operations": [
                { "dimension": "channel", "action": "set_value", "value": "Facebook" }
            ],
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn deserializes_snake_case_vocabulary() {
        let f = minimal_filter();
        assert_eq!(f.conditions[0].field, SourceField::UtmSource);
        assert_eq!(f.operations[0].dimension, WritableDimension::Channel);
        assert!(f.enabled);
        assert!(f.validate().is_ok());
    }

    #[test]
    fn stm_slots_round_trip() {
        let json = serde_json::to_string(&WritableDimension::Stm10).unwrap();
        assert_eq!(json, "\"stm_10\"");
        let back: WritableDimension = serde_json::from_str("\"stm_3\"").unwrap();
        assert_eq!(back, WritableDimension::Stm3);
        assert!(back.is_custom_dimension());
        assert!(!WritableDimension::Channel.is_custom_dimension());
    }

    #[test]
    fn validate_rejects_missing_condition_value() {
        let mut f = minimal_filter();
        f.conditions[0].value = None;
        assert!(f.validate().is_err());

        // is_empty needs no value
        f.conditions[0].operator = ConditionOperator::IsEmpty;
        assert!(f.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_sides() {
        let mut f = minimal_filter();
        f.operations.clear();
        assert!(f.validate().is_err());

        let mut f = minimal_filter();
        f.conditions.clear();
        assert!(f.validate().is_err());

        let mut f = minimal_filter();
        f.priority = 1001;
        assert!(f.validate().is_err());
    }
}
