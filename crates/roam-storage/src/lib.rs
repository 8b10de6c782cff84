//! Roam storage crate - SQLite record store for stamps and activities.
//!
//! Provides a WAL-mode SQLite database with migrations and the
//! `StampRepository` that answers "which stamps has this user not
//! collected yet".

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{NewStamp, StampRepository};
