//! Database schema migrations.
//!
//! Applies the stamp schema: activities, stamps, the per-stamp map and GPS
//! rows, and the ownership tokens that mark a stamp as collected.

use rusqlite::Connection;
use tracing::info;

use roam_core::error::RoamError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), RoamError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| RoamError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| RoamError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: stamp_schema");
    }

    Ok(())
}

/// Version 1: stamp schema.
fn apply_v1(conn: &Connection) -> Result<(), RoamError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS activities (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL
        );

        -- start_time / end_time are unix seconds at UTC midnight of the first
        -- and last day of the stamp.
        CREATE TABLE IF NOT EXISTS stamps (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            code        TEXT NOT NULL,
            activity_id INTEGER NOT NULL REFERENCES activities (id),
            product_id  INTEGER NOT NULL,
            name        TEXT NOT NULL,
            location    TEXT,
            start_time  INTEGER NOT NULL,
            end_time    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_stamps_window
            ON stamps (start_time, end_time);

        CREATE TABLE IF NOT EXISTS stamp_maps (
            stamp_id    INTEGER NOT NULL REFERENCES stamps (id),
            location    TEXT,
            latitude    REAL,
            longitude   REAL,
            store_name  TEXT
        );

        CREATE TABLE IF NOT EXISTS stamp_gps (
            stamp_id    INTEGER NOT NULL REFERENCES stamps (id),
            latitude    REAL,
            longitude   REAL
        );

        -- class 1 marks a collected stamp.
        CREATE TABLE IF NOT EXISTS tokens (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id  INTEGER NOT NULL,
            owner       TEXT NOT NULL,
            class       INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_tokens_owner
            ON tokens (owner, class);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'stamp_schema');
        ",
    )
    .map_err(|e| RoamError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
