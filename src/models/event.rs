use clickhouse::Row;
use serde::{Deserialize, Serialize};

use crate::models::filter::{SourceField, WritableDimension};

/// One row of the per-workspace `events` table. Timestamps are epoch
/// milliseconds against DateTime64(3) columns. The table is a
/// ReplacingMergeTree keyed on `dedup_token` and versioned by `_version`,
/// so repeated submissions of the same logical action collapse to the row
/// with the highest `_version`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Row)]
pub struct TrackingEvent {
    pub session_id: String,
    pub workspace_id: String,
    /// "screen_view" or "goal".
    pub name: String,
    pub dedup_token: String,
    #[serde(rename = "_version")]
    pub version: i64,
    pub received_at: i64,
    pub created_at: i64,
    pub updated_at: i64,

    pub user_id: String,
    pub sdk_version: String,

    // ── Traffic source ──
    pub referrer: String,
    pub referrer_domain: String,
    pub referrer_path: String,
    pub is_direct: bool,
    pub landing_page: String,
    pub landing_page_domain: String,
    pub landing_page_path: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_term: String,
    pub utm_content: String,
    pub utm_id: String,
    pub utm_id_from: String,
    pub channel: String,
    pub channel_group: String,

    // ── Device / locale ──
    pub device: String,
    pub browser: String,
    pub browser_type: String,
    pub os: String,
    pub user_agent: String,
    pub connection_type: String,
    pub language: String,
    pub timezone: String,
    pub screen_width: u16,
    pub screen_height: u16,
    pub viewport_width: u16,
    pub viewport_height: u16,

    // ── Geo ──
    pub country: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,

    // ── Custom dimensions ──
    pub stm_1: String,
    pub stm_2: String,
    pub stm_3: String,
    pub stm_4: String,
    pub stm_5: String,
    pub stm_6: String,
    pub stm_7: String,
    pub stm_8: String,
    pub stm_9: String,
    pub stm_10: String,

    // ── Pageview ──
    pub path: String,
    pub previous_path: String,
    pub page_number: u32,
    pub duration: u32,
    pub page_duration: u32,
    pub max_scroll: u32,
    pub entered_at: i64,
    pub exited_at: i64,

    // ── Goal ──
    pub goal_name: String,
    pub goal_value: f64,
    pub goal_timestamp: String,
    /// Opaque JSON bag, preserved as-is.
    pub properties: String,
}

pub const EVENT_NAME_SCREEN_VIEW: &str = "screen_view";
pub const EVENT_NAME_GOAL: &str = "goal";

impl TrackingEvent {
    /// Read the value a filter condition tests. `is_direct` is exposed as the
    /// strings "true"/"false" so the string operators apply uniformly.
    pub fn source_value(&self, field: SourceField) -> &str {
        match field {
            SourceField::UtmSource => &self.utm_source,
            SourceField::UtmMedium => &self.utm_medium,
            SourceField::UtmCampaign => &self.utm_campaign,
            SourceField::UtmTerm => &self.utm_term,
            SourceField::UtmContent => &self.utm_content,
            SourceField::UtmId => &self.utm_id,
            SourceField::UtmIdFrom => &self.utm_id_from,
            SourceField::Referrer => &self.referrer,
            SourceField::ReferrerDomain => &self.referrer_domain,
            SourceField::ReferrerPath => &self.referrer_path,
            SourceField::LandingPage => &self.landing_page,
            SourceField::LandingPageDomain => &self.landing_page_domain,
            SourceField::LandingPagePath => &self.landing_page_path,
            SourceField::Path => &self.path,
            SourceField::Device => &self.device,
            SourceField::Browser => &self.browser,
            SourceField::BrowserType => &self.browser_type,
            SourceField::Os => &self.os,
            SourceField::UserAgent => &self.user_agent,
            SourceField::ConnectionType => &self.connection_type,
            SourceField::Language => &self.language,
            SourceField::Timezone => &self.timezone,
            SourceField::IsDirect => {
                if self.is_direct {
                    "true"
                } else {
                    "false"
                }
            }
        }
    }

    /// Current value of a writable dimension, with the same string view of
    /// `is_direct` as `source_value`.
    pub fn dimension_value(&self, dim: WritableDimension) -> &str {
        match dim {
            WritableDimension::Channel => &self.channel,
            WritableDimension::ChannelGroup => &self.channel_group,
            WritableDimension::Stm1 => &self.stm_1,
            WritableDimension::Stm2 => &self.stm_2,
            WritableDimension::Stm3 => &self.stm_3,
            WritableDimension::Stm4 => &self.stm_4,
            WritableDimension::Stm5 => &self.stm_5,
            WritableDimension::Stm6 => &self.stm_6,
            WritableDimension::Stm7 => &self.stm_7,
            WritableDimension::Stm8 => &self.stm_8,
            WritableDimension::Stm9 => &self.stm_9,
            WritableDimension::Stm10 => &self.stm_10,
            WritableDimension::UtmSource => &self.utm_source,
            WritableDimension::UtmMedium => &self.utm_medium,
            WritableDimension::UtmCampaign => &self.utm_campaign,
            WritableDimension::UtmTerm => &self.utm_term,
            WritableDimension::UtmContent => &self.utm_content,
            WritableDimension::UtmId => &self.utm_id,
            WritableDimension::UtmIdFrom => &self.utm_id_from,
            WritableDimension::ReferrerDomain => &self.referrer_domain,
            WritableDimension::IsDirect => {
                if self.is_direct {
                    "true"
                } else {
                    "false"
                }
            }
        }
    }

    /// Overwrite a writable dimension. The boolean `is_direct` column coerces
    /// the strings "true"/"false"; anything else clears it.
    pub fn set_dimension(&mut self, dim: WritableDimension, value: &str) {
        match dim {
            WritableDimension::Channel => self.channel = value.to_string(),
            WritableDimension::ChannelGroup => self.channel_group = value.to_string(),
            WritableDimension::Stm1 => self.stm_1 = value.to_string(),
            WritableDimension::Stm2 => self.stm_2 = value.to_string(),
            WritableDimension::Stm3 => self.stm_3 = value.to_string(),
            WritableDimension::Stm4 => self.stm_4 = value.to_string(),
            WritableDimension::Stm5 => self.stm_5 = value.to_string(),
            WritableDimension::Stm6 => self.stm_6 = value.to_string(),
            WritableDimension::Stm7 => self.stm_7 = value.to_string(),
            WritableDimension::Stm8 => self.stm_8 = value.to_string(),
            WritableDimension::Stm9 => self.stm_9 = value.to_string(),
            WritableDimension::Stm10 => self.stm_10 = value.to_string(),
            WritableDimension::UtmSource => self.utm_source = value.to_string(),
            WritableDimension::UtmMedium => self.utm_medium = value.to_string(),
            WritableDimension::UtmCampaign => self.utm_campaign = value.to_string(),
            WritableDimension::UtmTerm => self.utm_term = value.to_string(),
            WritableDimension::UtmContent => self.utm_content = value.to_string(),
            WritableDimension::UtmId => self.utm_id = value.to_string(),
            WritableDimension::UtmIdFrom => self.utm_id_from = value.to_string(),
            WritableDimension::ReferrerDomain => self.referrer_domain = value.to_string(),
            WritableDimension::IsDirect => self.is_direct = value == "true",
        }
    }

    /// Dedup token for a pageview: one logical row per (session, page_number).
    pub fn pageview_dedup_token(session_id: &str, page_number: u32) -> String {
        format!("{session_id}_pv_{page_number}")
    }

    /// Dedup token for a goal: one logical row per (session, goal, fire time).
    pub fn goal_dedup_token(session_id: &str, goal_name: &str, timestamp_ms: i64) -> String {
        format!("{session_id}_goal_{goal_name}_{timestamp_ms}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_tokens() {
        assert_eq!(TrackingEvent::pageview_dedup_token("s1", 3), "s1_pv_3");
        assert_eq!(
            TrackingEvent::goal_dedup_token("s", "purchase", 1704067200000),
            "s_goal_purchase_1704067200000"
        );
    }

    #[test]
    fn is_direct_string_view_and_coercion() {
        let mut e = TrackingEvent::default();
        assert_eq!(e.source_value(SourceField::IsDirect), "false");
        e.set_dimension(WritableDimension::IsDirect, "true");
        assert!(e.is_direct);
        assert_eq!(e.dimension_value(WritableDimension::IsDirect), "true");
        e.set_dimension(WritableDimension::IsDirect, "false");
        assert!(!e.is_direct);
    }

    #[test]
    fn set_dimension_overwrites() {
        let mut e = TrackingEvent {
            channel: "Organic".to_string(),
            ..Default::default()
        };
        e.set_dimension(WritableDimension::Channel, "Paid Social");
        assert_eq!(e.channel, "Paid Social");
        e.set_dimension(WritableDimension::Stm4, "variant-b");
        assert_eq!(e.stm_4, "variant-b");
    }
}
