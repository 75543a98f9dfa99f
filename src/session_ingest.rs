use chrono::Utc;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;

use crate::enrich;
use crate::error::IngestError;
use crate::event_buffer::EventBuffer;
use crate::filters::eval::apply_filters;
use crate::geo::{self, GeoResolver};
use crate::models::event::{EVENT_NAME_GOAL, EVENT_NAME_SCREEN_VIEW, TrackingEvent};
use crate::models::payload::{Action, ActionDecodeError, SessionPayload};
use crate::workspace_cache::WorkspaceCache;

/// Acknowledgement returned to the SDK. `checkpoint` is the count of
/// actions now durably accepted; the client sends it back on the next
/// incremental payload.
#[derive(Debug, Clone, Serialize)]
pub struct IngestAck {
    pub success: bool,
    pub checkpoint: i64,
}

/// Turns one session payload into enriched tracking events and hands them
/// to the buffer. Stateless per request after the workspace lookup, and
/// idempotent under replay: a resent action produces a row with the same
/// dedup_token and a fresh `_version`, which the store folds away.
pub struct SessionIngestor {
    cache: Arc<WorkspaceCache>,
    buffer: EventBuffer,
    geo: Arc<dyn GeoResolver>,
}

impl SessionIngestor {
    pub fn new(cache: Arc<WorkspaceCache>, buffer: EventBuffer, geo: Arc<dyn GeoResolver>) -> Self {
        Self { cache, buffer, geo }
    }

    pub async fn handle(
        &self,
        payload: SessionPayload,
        client_ip: Option<IpAddr>,
    ) -> Result<IngestAck, IngestError> {
        if payload.session_id.is_empty() {
            return Err(IngestError::Validation("session_id must not be empty".into()));
        }

        let workspace = self
            .cache
            .get(&payload.workspace_id)
            .await?
            .ok_or_else(|| IngestError::InvalidWorkspace(payload.workspace_id.clone()))?;

        let total = payload.actions.len();
        let start_index = payload.start_index();
        if start_index >= total {
            // Everything in this payload was already acknowledged.
            return Ok(IngestAck {
                success: true,
                checkpoint: total as i64,
            });
        }

        let geo_info = geo::resolve_for_workspace(self.geo.as_ref(), client_ip, &workspace.settings);

        // One server stamp shared by every event of this payload; the
        // replacing merge keeps the row with the highest stamp.
        let now_ms = Utc::now().timestamp_millis();
        let base = enrich::base_event(&workspace, &payload, &geo_info, now_ms, now_ms);

        // Reconstruct the previous_path chain from the acknowledged prefix.
        // Earlier actions were validated when first submitted; a prefix
        // entry that no longer decodes just doesn't move the chain.
        let mut previous_path = String::new();
        for raw in &payload.actions[..start_index] {
            if let Ok(Action::Pageview(p)) = Action::decode(raw) {
                previous_path = p.path;
            }
        }

        let mut events = Vec::with_capacity(total - start_index);
        for raw in &payload.actions[start_index..] {
            let action = Action::decode(raw).map_err(|e| match e {
                ActionDecodeError::UnknownType(_) => IngestError::BadAction(e.to_string()),
                ActionDecodeError::Invalid(msg) => IngestError::Validation(msg),
            })?;

            let mut event = base.clone();
            match action {
                Action::Pageview(p) => {
                    if p.page_number == 0 {
                        return Err(IngestError::Validation(
                            "pageview page_number must be >= 1".into(),
                        ));
                    }
                    event.name = EVENT_NAME_SCREEN_VIEW.to_string();
                    event.dedup_token =
                        TrackingEvent::pageview_dedup_token(&payload.session_id, p.page_number);
                    event.path = p.path.clone();
                    event.page_number = p.page_number;
                    event.duration = p.duration;
                    event.page_duration = p.duration;
                    event.max_scroll = p.scroll;
                    event.previous_path = previous_path.clone();
                    event.entered_at = p.entered_at;
                    event.exited_at = p.exited_at;
                    event.goal_timestamp = String::new();
                    previous_path = p.path;
                }
                Action::Goal(g) => {
                    if g.page_number == 0 {
                        return Err(IngestError::Validation(
                            "goal page_number must be >= 1".into(),
                        ));
                    }
                    event.name = EVENT_NAME_GOAL.to_string();
                    event.dedup_token = TrackingEvent::goal_dedup_token(
                        &payload.session_id,
                        &g.name,
                        g.timestamp,
                    );
                    event.path = g.path;
                    event.page_number = g.page_number;
                    event.goal_name = g.name;
                    event.goal_value = g.value.unwrap_or(0.0);
                    event.goal_timestamp = g.timestamp.to_string();
                    event.properties = g
                        .properties
                        .as_ref()
                        .map(|p| p.to_string())
                        .unwrap_or_default();
                    // Pageview-only numerics stay zeroed; the chain does not
                    // advance through goals.
                }
            }

            if !workspace.filters.is_empty() {
                apply_filters(&workspace.filters, &mut event);
            }
            events.push(event);
        }

        self.buffer
            .add_batch(events)
            .await
            .map_err(IngestError::Buffer)?;

        Ok(IngestAck {
            success: true,
            checkpoint: total as i64,
        })
    }
}
