use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::net::{IpAddr, SocketAddr};

use crate::AppState;
use crate::models::payload::SessionPayload;

/// Client IP for the geo lookup: leftmost X-Forwarded-For hop when the
/// service sits behind a proxy, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return Some(ip);
            }
        }
    }
    Some(peer.ip())
}

/// POST /api/v1/ingest/session — SDK submits an incremental session payload.
pub async fn ingest_session(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<SessionPayload>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let ip = client_ip(&headers, peer);
    let ack = state
        .ingest
        .handle(payload, ip)
        .await
        .map_err(|e| (e.status_code(), e.to_string()))?;
    Ok(Json(ack))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "10.0.0.2:9000".parse().unwrap();
        assert_eq!(
            client_ip(&headers, peer),
            Some("203.0.113.9".parse().unwrap())
        );
    }

    #[test]
    fn falls_back_to_peer_ip() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.7:9000".parse().unwrap();
        assert_eq!(client_ip(&headers, peer), Some("192.0.2.7".parse().unwrap()));

        let mut bad = HeaderMap::new();
        bad.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        assert_eq!(client_ip(&bad, peer), Some("192.0.2.7".parse().unwrap()));
    }
}
