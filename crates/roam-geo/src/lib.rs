//! Roam geo crate - distance, region filtering, nearest-stamp ranking and
//! IP-based geolocation.

pub mod distance;
pub mod locator;
pub mod rank;
pub mod region;

pub use distance::{haversine_km, EARTH_RADIUS_KM};
pub use locator::{FixedLocator, IpLocator, LocationSource, Locator, ResolvedLocation};
pub use rank::{address_contains, list_all, rank};
pub use region::region_for_city;
