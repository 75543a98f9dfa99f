use serde::Deserialize;
use std::collections::BTreeMap;

/// Incremental session payload posted by the browser SDK. Actions are
/// cumulative: the client resends its full action list and `checkpoint`
/// records how many leading actions the server has already acknowledged.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionPayload {
    pub workspace_id: String,
    pub session_id: String,
    /// Kept raw; per-action deserialization happens from the checkpoint
    /// forward so an unknown action type surfaces as a typed error.
    pub actions: Vec<serde_json::Value>,
    #[serde(default)]
    pub checkpoint: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub sdk_version: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// stm_1..stm_10 slot values keyed by slot name.
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    /// Present at least on the first payload of a session.
    #[serde(default)]
    pub attributes: Option<SessionAttributes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionAttributes {
    #[serde(default)]
    pub landing_page: String,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub utm_source: String,
    #[serde(default)]
    pub utm_medium: String,
    #[serde(default)]
    pub utm_campaign: String,
    #[serde(default)]
    pub utm_term: String,
    #[serde(default)]
    pub utm_content: String,
    #[serde(default)]
    pub utm_id: String,
    #[serde(default)]
    pub utm_id_from: String,
    #[serde(default)]
    pub screen_width: u16,
    #[serde(default)]
    pub screen_height: u16,
    #[serde(default)]
    pub viewport_width: u16,
    #[serde(default)]
    pub viewport_height: u16,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub browser: String,
    #[serde(default)]
    pub browser_type: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub connection_type: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub timezone: String,
}

/// A decoded SDK action.
#[derive(Debug, Clone)]
pub enum Action {
    Pageview(PageviewAction),
    Goal(GoalAction),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageviewAction {
    pub path: String,
    pub page_number: u32,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub scroll: u32,
    #[serde(default)]
    pub entered_at: i64,
    #[serde(default)]
    pub exited_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoalAction {
    pub name: String,
    #[serde(default)]
    pub path: String,
    pub page_number: u32,
    pub timestamp: i64,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub properties: Option<serde_json::Value>,
}

/// Why a raw action failed to decode. Unknown types and malformed payloads
/// surface as different client errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDecodeError {
    UnknownType(String),
    Invalid(String),
}

impl std::fmt::Display for ActionDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionDecodeError::UnknownType(t) => write!(f, "unknown action type '{t}'"),
            ActionDecodeError::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

impl Action {
    /// Decode one raw action. Unknown `type` values are a payload-level
    /// error, not a silently dropped element.
    pub fn decode(raw: &serde_json::Value) -> Result<Action, ActionDecodeError> {
        let kind = raw
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ActionDecodeError::Invalid("action missing type".to_string()))?;
        match kind {
            "pageview" => serde_json::from_value::<PageviewAction>(raw.clone())
                .map(Action::Pageview)
                .map_err(|e| ActionDecodeError::Invalid(format!("bad pageview action: {e}"))),
            "goal" => serde_json::from_value::<GoalAction>(raw.clone())
                .map(Action::Goal)
                .map_err(|e| ActionDecodeError::Invalid(format!("bad goal action: {e}"))),
            other => Err(ActionDecodeError::UnknownType(other.to_string())),
        }
    }
}

impl SessionPayload {
    /// Index of the first action not yet acknowledged. Initial checkpoint
    /// is -1, so a fresh session starts at 0.
    pub fn start_index(&self) -> usize {
        let next = self.checkpoint.unwrap_or(-1) + 1;
        next.max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_index_defaults_to_zero() {
        let p: SessionPayload = serde_json::from_value(serde_json::json!({
            "workspace_id": "w1",
            "session_id": "s1",
            "actions": [],
            "created_at": 1,
            "updated_at": 1
        }))
        .unwrap();
        assert_eq!(p.start_index(), 0);
    }

    #[test]
    fn start_index_skips_acknowledged() {
        let p: SessionPayload = serde_json::from_value(serde_json::json!({
            "workspace_id": "w1",
            "session_id": "s1",
            "actions": [],
            "checkpoint": 2,
            "created_at": 1,
            "updated_at": 1
        }))
        .unwrap();
        assert_eq!(p.start_index(), 3);
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let err = Action::decode(&serde_json::json!({ "type": "scroll", "path": "/" }));
        assert_eq!(
            err.unwrap_err(),
            ActionDecodeError::UnknownType("scroll".to_string())
        );
    }

    #[test]
    fn decode_pageview_and_goal() {
        let pv = Action::decode(&serde_json::json!({
            "type": "pageview", "path": "/docs", "page_number": 2,
            "duration": 12, "scroll": 80, "entered_at": 100, "exited_at": 200
        }))
        .unwrap();
        match pv {
            Action::Pageview(p) => {
                assert_eq!(p.path, "/docs");
                assert_eq!(p.page_number, 2);
                assert_eq!(p.scroll, 80);
            }
            _ => panic!("expected pageview"),
        }

        let goal = Action::decode(&serde_json::json!({
            "type": "goal", "name": "signup", "path": "/pricing",
            "page_number": 1, "timestamp": 1704067200000i64, "value": 9.5
        }))
        .unwrap();
        match goal {
            Action::Goal(g) => {
                assert_eq!(g.name, "signup");
                assert_eq!(g.value, Some(9.5));
            }
            _ => panic!("expected goal"),
        }
    }
}
