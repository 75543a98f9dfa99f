use std::collections::HashMap;
use std::net::IpAddr;

use crate::models::workspace::WorkspaceSettings;

/// Geo attributes resolved from a client IP.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoInfo {
    pub country: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// In-process, synchronous IP-to-geo lookup. The production resolver (an
/// MMDB reader) lives behind this trait; the ingest core only depends on
/// the seam.
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, ip: IpAddr) -> Option<GeoInfo>;
}

/// Resolver used when no geo database is configured.
#[derive(Debug, Default)]
pub struct DisabledGeoResolver;

impl GeoResolver for DisabledGeoResolver {
    fn resolve(&self, _ip: IpAddr) -> Option<GeoInfo> {
        None
    }
}

/// Exact-match table resolver for development and tests.
#[derive(Debug, Default)]
pub struct StaticGeoResolver {
    entries: HashMap<IpAddr, GeoInfo>,
}

impl StaticGeoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, ip: IpAddr, info: GeoInfo) -> Self {
        self.entries.insert(ip, info);
        self
    }
}

impl GeoResolver for StaticGeoResolver {
    fn resolve(&self, ip: IpAddr) -> Option<GeoInfo> {
        self.entries.get(&ip).cloned()
    }
}

/// Resolve the client IP once per payload, honoring the workspace's geo
/// settings: the enable flag gates the lookup entirely, city/region can be
/// suppressed, and coordinates are rounded to the configured number of
/// decimal places.
pub fn resolve_for_workspace(
    resolver: &dyn GeoResolver,
    ip: Option<IpAddr>,
    settings: &WorkspaceSettings,
) -> GeoInfo {
    if !settings.geo_enabled {
        return GeoInfo::default();
    }
    let Some(ip) = ip else {
        return GeoInfo::default();
    };
    let Some(mut info) = resolver.resolve(ip) else {
        return GeoInfo::default();
    };

    if !settings.geo_store_city {
        info.city = String::new();
    }
    if !settings.geo_store_region {
        info.region = String::new();
    }
    info.latitude = round_to(info.latitude, settings.geo_coordinates_precision);
    info.longitude = round_to(info.longitude, settings.geo_coordinates_precision);
    info
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals.min(9) as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn berlin() -> GeoInfo {
        GeoInfo {
            country: "DE".to_string(),
            region: "Berlin".to_string(),
            city: "Berlin".to_string(),
            latitude: 52.520008,
            longitude: 13.404954,
        }
    }

    fn resolver() -> StaticGeoResolver {
        StaticGeoResolver::new().with_entry("203.0.113.9".parse().unwrap(), berlin())
    }

    #[test]
    fn disabled_workspace_gets_empty_geo() {
        let settings = WorkspaceSettings {
            geo_enabled: false,
            ..Default::default()
        };
        let info = resolve_for_workspace(&resolver(), Some("203.0.113.9".parse().unwrap()), &settings);
        assert_eq!(info, GeoInfo::default());
    }

    #[test]
    fn city_and_region_suppression() {
        let settings = WorkspaceSettings {
            geo_store_city: false,
            geo_store_region: false,
            ..Default::default()
        };
        let info = resolve_for_workspace(&resolver(), Some("203.0.113.9".parse().unwrap()), &settings);
        assert_eq!(info.city, "");
        assert_eq!(info.region, "");
        assert_eq!(info.country, "DE");
    }

    #[test]
    fn coordinates_rounded_to_precision() {
        let settings = WorkspaceSettings {
            geo_coordinates_precision: 1,
            ..Default::default()
        };
        let info = resolve_for_workspace(&resolver(), Some("203.0.113.9".parse().unwrap()), &settings);
        assert_eq!(info.latitude, 52.5);
        assert_eq!(info.longitude, 13.4);
    }

    #[test]
    fn missing_ip_or_unknown_ip_is_empty() {
        let settings = WorkspaceSettings::default();
        assert_eq!(
            resolve_for_workspace(&resolver(), None, &settings),
            GeoInfo::default()
        );
        assert_eq!(
            resolve_for_workspace(&resolver(), Some("198.51.100.1".parse().unwrap()), &settings),
            GeoInfo::default()
        );
    }
}
