use url::Url;

use crate::geo::GeoInfo;
use crate::models::event::TrackingEvent;
use crate::models::payload::SessionPayload;
use crate::models::workspace::Workspace;

/// Domain + path split of a raw URL. Parse failures are non-fatal and
/// yield empty parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UrlParts {
    pub domain: String,
    pub path: String,
}

pub fn parse_url_parts(raw: &str) -> UrlParts {
    if raw.is_empty() {
        return UrlParts::default();
    }
    match Url::parse(raw) {
        Ok(url) => UrlParts {
            domain: url.host_str().unwrap_or("").to_string(),
            path: url.path().to_string(),
        },
        Err(_) => UrlParts::default(),
    }
}

/// Build the session-scoped base event every action row inherits: traffic
/// source, landing page, UTM, device, locale and geo. stm_* slots come
/// from the payload's dimensions bag; action-specific columns stay zeroed.
pub fn base_event(
    workspace: &Workspace,
    payload: &SessionPayload,
    geo: &GeoInfo,
    version: i64,
    received_at: i64,
) -> TrackingEvent {
    let attrs = payload.attributes.clone().unwrap_or_default();
    let referrer = parse_url_parts(&attrs.referrer);
    let landing = parse_url_parts(&attrs.landing_page);

    let mut event = TrackingEvent {
        session_id: payload.session_id.clone(),
        workspace_id: workspace.id.clone(),
        version,
        received_at,
        created_at: payload.created_at,
        updated_at: payload.updated_at,
        user_id: payload.user_id.clone().unwrap_or_default(),
        sdk_version: payload.sdk_version.clone().unwrap_or_default(),

        referrer: attrs.referrer.clone(),
        referrer_domain: referrer.domain,
        referrer_path: referrer.path,
        is_direct: attrs.referrer.is_empty(),
        landing_page: attrs.landing_page.clone(),
        landing_page_domain: landing.domain,
        landing_page_path: landing.path,
        utm_source: attrs.utm_source,
        utm_medium: attrs.utm_medium,
        utm_campaign: attrs.utm_campaign,
        utm_term: attrs.utm_term,
        utm_content: attrs.utm_content,
        utm_id: attrs.utm_id,
        utm_id_from: attrs.utm_id_from,

        device: attrs.device,
        browser: attrs.browser,
        browser_type: attrs.browser_type,
        os: attrs.os,
        user_agent: attrs.user_agent,
        connection_type: attrs.connection_type,
        language: attrs.language,
        timezone: attrs.timezone,
        screen_width: attrs.screen_width,
        screen_height: attrs.screen_height,
        viewport_width: attrs.viewport_width,
        viewport_height: attrs.viewport_height,

        country: geo.country.clone(),
        region: geo.region.clone(),
        city: geo.city.clone(),
        latitude: geo.latitude,
        longitude: geo.longitude,

        ..Default::default()
    };

    for (slot, value) in &payload.dimensions {
        match slot.as_str() {
            "stm_1" => event.stm_1 = value.clone(),
            "stm_2" => event.stm_2 = value.clone(),
            "stm_3" => event.stm_3 = value.clone(),
            "stm_4" => event.stm_4 = value.clone(),
            "stm_5" => event.stm_5 = value.clone(),
            "stm_6" => event.stm_6 = value.clone(),
            "stm_7" => event.stm_7 = value.clone(),
            "stm_8" => event.stm_8 = value.clone(),
            "stm_9" => event.stm_9 = value.clone(),
            "stm_10" => event.stm_10 = value.clone(),
            other => {
                tracing::debug!("ignoring unknown dimension slot {other}");
            }
        }
    }

    event
}
