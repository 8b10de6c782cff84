//! Nearest-stamp ranking.
//!
//! Pure functions over a snapshot of candidate stamps: no state, no I/O.

use roam_core::types::{GeoPoint, RankedStamp, StampLocation};

use crate::distance::haversine_km;

/// Default region filter: the address contains the region name.
pub fn address_contains(address: &str, region: &str) -> bool {
    address.contains(region)
}

/// Rank `candidates` by distance from `user_point`, keeping at most `k`.
///
/// Returns nothing when the user's point or region is unknown. Candidates
/// are kept only if `region_filter(address, region)` holds and both their
/// coordinates are present. Distances are rounded to two decimals and the
/// sort is stable, so equal distances keep their input order.
pub fn rank<F>(
    user_point: &GeoPoint,
    user_region: Option<&str>,
    candidates: &[StampLocation],
    region_filter: F,
    k: usize,
) -> Vec<RankedStamp>
where
    F: Fn(&str, &str) -> bool,
{
    let Some((user_lat, user_lon)) = user_point.coordinates() else {
        return Vec::new();
    };
    let Some(region) = user_region.filter(|r| !r.is_empty()) else {
        return Vec::new();
    };

    let mut ranked: Vec<RankedStamp> = candidates
        .iter()
        .filter(|stamp| region_filter(&stamp.address, region))
        .filter_map(|stamp| {
            let (lat, lon) = stamp.point().coordinates()?;
            let distance = haversine_km(user_lat, user_lon, lat, lon);
            Some(RankedStamp {
                stamp: stamp.clone(),
                distance_km: round2(distance),
            })
        })
        .collect();

    ranked.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    ranked.truncate(k);
    ranked
}

/// Every candidate, unfiltered and unranked.
pub fn list_all(candidates: &[StampLocation]) -> Vec<StampLocation> {
    candidates.to_vec()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
