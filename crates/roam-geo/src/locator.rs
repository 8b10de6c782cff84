//! IP-based geolocation with an ordered provider fallback chain.
//!
//! Providers are tried in configuration order; the first response carrying
//! both coordinates wins. When every provider fails the configured fallback
//! point is returned, so callers always get a location.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use roam_core::config::{GeoConfig, GeoProviderConfig, GeoProviderKind};
use roam_core::error::RoamError;
use roam_core::types::GeoPoint;

/// Where a resolved location came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationSource {
    Provider(GeoProviderKind),
    Fallback,
}

/// A user's approximate position and the provider's city name.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub point: GeoPoint,
    pub city: Option<String>,
    pub source: LocationSource,
}

/// Resolves a caller's approximate location. Never fails.
#[async_trait]
pub trait Locator: Send + Sync {
    async fn locate(&self, client_ip: Option<IpAddr>) -> ResolvedLocation;
}

/// Locator backed by public IP geolocation HTTP services.
pub struct IpLocator {
    client: reqwest::Client,
    providers: Vec<GeoProviderConfig>,
    fallback: ResolvedLocation,
}

impl IpLocator {
    pub fn new(config: &GeoConfig) -> Result<Self, RoamError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RoamError::Geo(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            providers: config.providers.clone(),
            fallback: ResolvedLocation {
                point: GeoPoint::new(config.fallback_latitude, config.fallback_longitude),
                city: Some(config.fallback_city.clone()),
                source: LocationSource::Fallback,
            },
        })
    }

    async fn query(
        &self,
        provider: &GeoProviderConfig,
        client_ip: Option<IpAddr>,
    ) -> Result<ResolvedLocation, RoamError> {
        let url = provider_url(provider, client_ip);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RoamError::Geo(e.to_string()))?
            .json()
            .await
            .map_err(|e| RoamError::Geo(e.to_string()))?;

        parse_response(provider.kind, &body)
            .ok_or_else(|| RoamError::Geo("incomplete location in response".to_string()))
    }
}

#[async_trait]
impl Locator for IpLocator {
    async fn locate(&self, client_ip: Option<IpAddr>) -> ResolvedLocation {
        for provider in &self.providers {
            match self.query(provider, client_ip).await {
                Ok(location) => {
                    debug!(url = %provider.url, city = ?location.city, "Geolocation resolved");
                    return location;
                }
                Err(e) => {
                    warn!(url = %provider.url, error = %e, "Geolocation provider failed");
                }
            }
        }

        warn!("All geolocation providers failed, using fallback location");
        self.fallback.clone()
    }
}

/// Locator that always answers with the same location.
#[derive(Debug, Clone)]
pub struct FixedLocator(pub ResolvedLocation);

impl FixedLocator {
    pub fn at(latitude: f64, longitude: f64, city: &str) -> Self {
        Self(ResolvedLocation {
            point: GeoPoint::new(latitude, longitude),
            city: Some(city.to_string()),
            source: LocationSource::Fallback,
        })
    }
}

#[async_trait]
impl Locator for FixedLocator {
    async fn locate(&self, _client_ip: Option<IpAddr>) -> ResolvedLocation {
        self.0.clone()
    }
}

/// Provider URL, addressed at the client when its IP is public.
fn provider_url(provider: &GeoProviderConfig, client_ip: Option<IpAddr>) -> String {
    let Some(ip) = client_ip.filter(is_public) else {
        return provider.url.clone();
    };
    match provider.kind {
        GeoProviderKind::IpapiCo => {
            // https://ipapi.co/json/ -> https://ipapi.co/{ip}/json/
            let base = provider.url.trim_end_matches('/').trim_end_matches("json");
            format!("{}{}/json/", base, ip)
        }
        GeoProviderKind::IpApi | GeoProviderKind::FreeGeoIp => {
            format!("{}/{}", provider.url.trim_end_matches('/'), ip)
        }
    }
}

fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            !(v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00)
        }
    }
}

/// Extract a complete location from a provider response body.
fn parse_response(kind: GeoProviderKind, body: &Value) -> Option<ResolvedLocation> {
    let (lat, lon) = match kind {
        GeoProviderKind::IpApi => {
            if body["status"].as_str() != Some("success") {
                return None;
            }
            (number(&body["lat"])?, number(&body["lon"])?)
        }
        GeoProviderKind::IpapiCo | GeoProviderKind::FreeGeoIp => {
            // These services report 0 for unknown coordinates.
            let lat = number(&body["latitude"]).filter(|v| *v != 0.0)?;
            let lon = number(&body["longitude"]).filter(|v| *v != 0.0)?;
            (lat, lon)
        }
    };

    Some(ResolvedLocation {
        point: GeoPoint::new(lat, lon),
        city: body["city"]
            .as_str()
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        source: LocationSource::Provider(kind),
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
