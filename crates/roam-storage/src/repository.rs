//! SQLite-backed stamp repository.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use tracing::debug;

use roam_core::error::RoamError;
use roam_core::store::StampStore;
use roam_core::types::{ActivityWindow, StampLocation, UserId};

use crate::db::Database;

const UNOBTAINED_SQL: &str = "
    SELECT
        a.name                                  AS activity_name,
        s.name                                  AS stamp_name,
        COALESCE(m.location, s.location)        AS address,
        COALESCE(g.latitude, m.latitude)        AS latitude,
        COALESCE(g.longitude, m.longitude)      AS longitude,
        m.store_name                            AS store_name,
        s.start_time,
        s.end_time
    FROM stamps s
    LEFT JOIN stamp_maps m ON s.id = m.stamp_id
    LEFT JOIN stamp_gps g ON s.id = g.stamp_id
    JOIN activities a ON s.activity_id = a.id
    WHERE s.start_time <= ?1
      AND s.end_time >= ?1
      AND s.product_id NOT IN (
          SELECT DISTINCT t.product_id
          FROM tokens t
          WHERE t.owner = ?2 AND t.class = 1
      )
    ORDER BY s.id";

/// A stamp to insert, with its optional map and GPS rows.
#[derive(Debug, Clone)]
pub struct NewStamp {
    pub code: String,
    pub activity_id: i64,
    pub product_id: i64,
    pub name: String,
    pub location: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub store_name: Option<String>,
    pub map_location: Option<String>,
    pub map_coordinates: Option<(f64, f64)>,
    pub gps_coordinates: Option<(f64, f64)>,
}

/// Repository for stamps and their ownership tokens.
pub struct StampRepository {
    db: Arc<Database>,
}

impl StampRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Stamps running on `date` whose product `user` has not collected.
    pub fn unobtained_on(
        &self,
        user: &UserId,
        date: NaiveDate,
    ) -> Result<Vec<StampLocation>, RoamError> {
        let day = day_start(date);
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(UNOBTAINED_SQL)
                .map_err(|e| RoamError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![day, user.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                })
                .map_err(|e| RoamError::Storage(e.to_string()))?;

            let mut stamps = Vec::new();
            for row in rows {
                let (activity_name, stamp_name, address, latitude, longitude, store_name, start, end) =
                    row.map_err(|e| RoamError::Storage(e.to_string()))?;
                stamps.push(StampLocation {
                    stamp_name,
                    activity_name,
                    activity_window: ActivityWindow {
                        start: epoch_to_date(start)?,
                        end: epoch_to_date(end)?,
                    },
                    address: address.unwrap_or_default(),
                    store_name,
                    latitude,
                    longitude,
                });
            }
            debug!(user_id = %user, count = stamps.len(), "Fetched unobtained stamps");
            Ok(stamps)
        })
    }

    /// Insert an activity and return its id.
    pub fn insert_activity(&self, name: &str) -> Result<i64, RoamError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO activities (name) VALUES (?1)",
                rusqlite::params![name],
            )
            .map_err(|e| RoamError::Storage(format!("Failed to save activity: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Insert a stamp plus its map / GPS rows and return the stamp id.
    pub fn insert_stamp(&self, stamp: &NewStamp) -> Result<i64, RoamError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stamps (code, activity_id, product_id, name, location, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    stamp.code,
                    stamp.activity_id,
                    stamp.product_id,
                    stamp.name,
                    stamp.location,
                    day_start(stamp.start),
                    day_start(stamp.end),
                ],
            )
            .map_err(|e| RoamError::Storage(format!("Failed to save stamp: {}", e)))?;
            let stamp_id = conn.last_insert_rowid();

            if stamp.store_name.is_some()
                || stamp.map_location.is_some()
                || stamp.map_coordinates.is_some()
            {
                conn.execute(
                    "INSERT INTO stamp_maps (stamp_id, location, latitude, longitude, store_name)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        stamp_id,
                        stamp.map_location,
                        stamp.map_coordinates.map(|c| c.0),
                        stamp.map_coordinates.map(|c| c.1),
                        stamp.store_name,
                    ],
                )
                .map_err(|e| RoamError::Storage(format!("Failed to save stamp map: {}", e)))?;
            }

            if let Some((lat, lon)) = stamp.gps_coordinates {
                conn.execute(
                    "INSERT INTO stamp_gps (stamp_id, latitude, longitude) VALUES (?1, ?2, ?3)",
                    rusqlite::params![stamp_id, lat, lon],
                )
                .map_err(|e| RoamError::Storage(format!("Failed to save stamp gps: {}", e)))?;
            }

            Ok(stamp_id)
        })
    }

    /// Record that `owner` collected the stamp for `product_id`.
    pub fn grant_token(&self, owner: &UserId, product_id: i64) -> Result<(), RoamError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tokens (product_id, owner, class) VALUES (?1, ?2, 1)",
                rusqlite::params![product_id, owner.as_str()],
            )
            .map_err(|e| RoamError::Storage(format!("Failed to save token: {}", e)))?;
            Ok(())
        })
    }
}

impl StampStore for StampRepository {
    fn unobtained_stamps(&self, user: &UserId) -> roam_core::Result<Vec<StampLocation>> {
        self.unobtained_on(user, Local::now().date_naive())
    }
}

fn day_start(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

fn epoch_to_date(secs: i64) -> Result<NaiveDate, RoamError> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| RoamError::Storage(format!("Invalid stamp timestamp: {}", secs)))
}
