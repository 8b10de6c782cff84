//! Stamp lookups offered to the generation engines.
//!
//! Each capability takes an explicit [`Caller`] so concurrent users never
//! see each other's stamps.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use roam_core::store::StampStore;
use roam_core::types::{Caller, RankedStamp, StampLocation};
use roam_geo::{address_contains, list_all, rank, region_for_city, Locator};

use crate::error::ChatError;

/// Stamp lookups scoped to a caller.
#[async_trait]
pub trait StampCapabilities: Send + Sync {
    /// The caller's nearest unobtained stamps in their region, closest first.
    async fn rank_nearby(&self, caller: &Caller) -> Vec<RankedStamp>;

    /// Every stamp the caller has not obtained yet.
    async fn list_all(&self, caller: &Caller) -> Vec<StampLocation>;
}

/// Capabilities backed by the stamp store and a geolocation source.
pub struct StampFinder {
    store: Arc<dyn StampStore>,
    locator: Arc<dyn Locator>,
    nearby_limit: usize,
}

impl StampFinder {
    pub fn new(store: Arc<dyn StampStore>, locator: Arc<dyn Locator>, nearby_limit: usize) -> Self {
        Self {
            store,
            locator,
            nearby_limit,
        }
    }

    /// Store lookups are synchronous (SQLite), so they run on the blocking pool.
    async fn unobtained(&self, caller: &Caller) -> Vec<StampLocation> {
        let store = Arc::clone(&self.store);
        let user = caller.user.clone();
        let lookup = tokio::task::spawn_blocking(move || store.unobtained_stamps(&user)).await;
        match lookup {
            Ok(Ok(stamps)) => stamps,
            Ok(Err(e)) => {
                tracing::warn!(user = %caller.user, error = %e, "Stamp lookup failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(user = %caller.user, error = %e, "Stamp lookup task failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl StampCapabilities for StampFinder {
    async fn rank_nearby(&self, caller: &Caller) -> Vec<RankedStamp> {
        let location = self.locator.locate(caller.client_ip).await;
        let region = location.city.as_deref().and_then(region_for_city);
        if region.is_none() {
            tracing::debug!(
                user = %caller.user,
                city = ?location.city,
                "No region for caller city"
            );
            return Vec::new();
        }

        let candidates = self.unobtained(caller).await;
        let ranked = rank(
            &location.point,
            region,
            &candidates,
            address_contains,
            self.nearby_limit,
        );
        tracing::info!(
            user = %caller.user,
            region = region.unwrap_or_default(),
            candidates = candidates.len(),
            ranked = ranked.len(),
            "Ranked nearby stamps"
        );
        ranked
    }

    async fn list_all(&self, caller: &Caller) -> Vec<StampLocation> {
        list_all(&self.unobtained(caller).await)
    }
}

/// Capabilities exposed to the language model as callable tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    NearStamps,
    AllStamps,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::NearStamps, Capability::AllStamps];

    pub fn name(self) -> &'static str {
        match self {
            Capability::NearStamps => "GetUserNearStamps",
            Capability::AllStamps => "GetUserAllStamps",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Capability::NearStamps => {
                "獲取使用者「附近 / 周邊 / 周遭」尚未獲得的集章名(stamp_name)、活動名(activity_name)、集章地址(address)，距離由近到遠排序"
            }
            Capability::AllStamps => {
                "獲取使用者所有尚未獲得的集章名(stamp_name)、活動名(activity_name)、集章地址(address)"
            }
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Function-calling schema for this capability. Neither takes arguments.
    pub fn tool_spec(self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": {"type": "object", "properties": {}},
            }
        })
    }

    /// Run the capability for `caller` and render its result as tool output.
    pub async fn invoke(self, capabilities: &dyn StampCapabilities, caller: &Caller) -> Value {
        match self {
            Capability::NearStamps => Value::Array(
                capabilities
                    .rank_nearby(caller)
                    .await
                    .iter()
                    .map(|ranked| {
                        let mut value = stamp_json(&ranked.stamp);
                        value["distance"] = json!(ranked.distance_km);
                        value
                    })
                    .collect(),
            ),
            Capability::AllStamps => Value::Array(
                capabilities
                    .list_all(caller)
                    .await
                    .iter()
                    .map(stamp_json)
                    .collect(),
            ),
        }
    }
}

/// Invoke the capability named `name`.
pub async fn invoke_by_name(
    name: &str,
    capabilities: &dyn StampCapabilities,
    caller: &Caller,
) -> Result<Value, ChatError> {
    let capability = Capability::from_name(name)
        .ok_or_else(|| ChatError::Capability(format!("unknown capability {name}")))?;
    Ok(capability.invoke(capabilities, caller).await)
}

fn stamp_json(stamp: &StampLocation) -> Value {
    json!({
        "stamp_name": stamp.stamp_name,
        "activity_name": stamp.activity_name,
        "activity_time": stamp.activity_window.to_string(),
        "address": stamp.address,
        "store_name": stamp.store_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::NaiveDate;
    use roam_core::config::{GeoConfig, GeoProviderConfig, GeoProviderKind};
    use roam_core::error::RoamError;
    use roam_core::types::{ActivityWindow, UserId};
    use roam_geo::{FixedLocator, IpLocator};

    struct MemoryStore {
        by_user: HashMap<String, Vec<StampLocation>>,
    }

    impl StampStore for MemoryStore {
        fn unobtained_stamps(&self, user: &UserId) -> roam_core::Result<Vec<StampLocation>> {
            Ok(self.by_user.get(user.as_str()).cloned().unwrap_or_default())
        }
    }

    struct BrokenStore;

    impl StampStore for BrokenStore {
        fn unobtained_stamps(&self, _user: &UserId) -> roam_core::Result<Vec<StampLocation>> {
            Err(RoamError::Storage("database is locked".into()))
        }
    }

    fn stamp(name: &str, address: &str, lat: f64, lon: f64) -> StampLocation {
        StampLocation {
            stamp_name: name.into(),
            activity_name: "數位觀光體驗集點".into(),
            activity_window: ActivityWindow {
                start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            },
            address: address.into(),
            store_name: Some("旅客中心".into()),
            latitude: Some(lat),
            longitude: Some(lon),
        }
    }

    fn finder(store: Arc<dyn StampStore>) -> StampFinder {
        // Kaohsiung city hall.
        let locator = Arc::new(FixedLocator::at(22.6203, 120.3120, "Kaohsiung"));
        StampFinder::new(store, locator, 3)
    }

    fn kaohsiung_store() -> Arc<dyn StampStore> {
        let stamps = vec![
            stamp("駁二", "803 高雄市鹽埕區大勇路1號", 22.6200, 120.2817),
            stamp("台北車站", "100 台北市中正區北平西路3號", 25.0478, 121.5170),
            stamp("市政府", "802 高雄市苓雅區四維三路2號", 22.6204, 120.3121),
            stamp("旗津", "805 高雄市旗津區旗津三路", 22.6133, 120.2660),
            stamp("蓮池潭", "813 高雄市左營區翠華路", 22.6800, 120.2950),
        ];
        Arc::new(MemoryStore {
            by_user: HashMap::from([("u1".to_string(), stamps)]),
        })
    }

    #[tokio::test]
    async fn test_rank_nearby_filters_region_and_sorts() {
        let finder = finder(kaohsiung_store());
        let ranked = finder.rank_nearby(&Caller::new(UserId::new("u1"))).await;

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].stamp.stamp_name, "市政府");
        assert!(ranked.iter().all(|r| r.stamp.address.contains("高雄")));
        assert!(ranked.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
    }

    #[tokio::test]
    async fn test_rank_nearby_unknown_city_is_empty() {
        let locator = Arc::new(FixedLocator::at(22.62, 120.31, "Osaka"));
        let finder = StampFinder::new(kaohsiung_store(), locator, 3);
        assert!(finder.rank_nearby(&Caller::new(UserId::new("u1"))).await.is_empty());
    }

    #[tokio::test]
    async fn test_taipei_fallback_finds_nothing_in_kaohsiung() {
        let locator = Arc::new(FixedLocator::at(25.0338, 121.5645, "Taipei"));
        let stamps = vec![
            stamp("駁二", "803 高雄市鹽埕區大勇路1號", 22.6200, 120.2817),
            stamp("市政府", "802 高雄市苓雅區四維三路2號", 22.6204, 120.3121),
        ];
        let store = Arc::new(MemoryStore {
            by_user: HashMap::from([("u1".to_string(), stamps)]),
        });
        let finder = StampFinder::new(store, locator, 3);
        assert!(finder.rank_nearby(&Caller::new(UserId::new("u1"))).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_geolocation_ranks_from_fallback() {
        let config = GeoConfig {
            providers: vec![GeoProviderConfig {
                kind: GeoProviderKind::IpApi,
                url: "http://127.0.0.1:1/json/".to_string(),
            }],
            request_timeout_secs: 1,
            ..GeoConfig::default()
        };
        let locator = Arc::new(IpLocator::new(&config).unwrap());
        let finder = StampFinder::new(kaohsiung_store(), locator, 3);
        assert!(finder.rank_nearby(&Caller::new(UserId::new("u1"))).await.is_empty());
    }

    #[tokio::test]
    async fn test_list_all_is_scoped_to_caller() {
        let finder = finder(kaohsiung_store());
        assert_eq!(finder.list_all(&Caller::new(UserId::new("u1"))).await.len(), 5);
        assert!(finder.list_all(&Caller::new(UserId::new("u2"))).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_yields_empty() {
        let finder = finder(Arc::new(BrokenStore));
        let caller = Caller::new(UserId::new("u1"));
        assert!(finder.list_all(&caller).await.is_empty());
        assert!(finder.rank_nearby(&caller).await.is_empty());
    }

    #[test]
    fn test_capability_names_round_trip() {
        for capability in Capability::ALL {
            assert_eq!(Capability::from_name(capability.name()), Some(capability));
        }
        assert_eq!(Capability::from_name("DropTables"), None);
    }

    #[test]
    fn test_tool_spec_shape() {
        let schema = Capability::NearStamps.tool_spec();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "GetUserNearStamps");
        assert_eq!(schema["function"]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn test_invoke_near_includes_distance_and_window() {
        let finder = finder(kaohsiung_store());
        let output = Capability::NearStamps
            .invoke(&finder, &Caller::new(UserId::new("u1")))
            .await;
        let first = &output.as_array().unwrap()[0];
        assert_eq!(first["stamp_name"], "市政府");
        assert_eq!(first["activity_time"], "2025-01-01~2025-12-31");
        assert_eq!(first["store_name"], "旅客中心");
        assert!(first["distance"].as_f64().unwrap() < 0.1);
    }

    #[tokio::test]
    async fn test_invoke_by_unknown_name() {
        let finder = finder(kaohsiung_store());
        let err = invoke_by_name("Nope", &finder, &Caller::new(UserId::new("u1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Capability(_)));
    }
}
