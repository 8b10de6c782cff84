use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identities
// =============================================================================

/// Opaque identity of a connecting client. The join key across the system.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque conversation session identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A conversation context bound to one user. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub owner: UserId,
    pub created_at: DateTime<Utc>,
}

/// Explicit caller context handed to every capability call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user: UserId,
    /// Remote address of the client transport, when known.
    pub client_ip: Option<IpAddr>,
}

impl Caller {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            client_ip: None,
        }
    }

    pub fn with_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.client_ip = ip;
        self
    }
}

// =============================================================================
// Geography
// =============================================================================

/// A point in decimal degrees. Either coordinate may be unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }

    /// A point with no known coordinates.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Both coordinates, or `None` if either is missing.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// First and last day of a stamp activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for ActivityWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}~{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// A collectible stamp tied to a physical location and a running activity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StampLocation {
    pub stamp_name: String,
    pub activity_name: String,
    pub activity_window: ActivityWindow,
    /// Postal address; empty when the store has none.
    pub address: String,
    pub store_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl StampLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// A stamp location with its distance from the user, in kilometres.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedStamp {
    #[serde(flatten)]
    pub stamp: StampLocation,
    pub distance_km: f64,
}
