//! Record-store seam for stamp data.

use crate::error::Result;
use crate::types::{StampLocation, UserId};

/// Source of a user's not-yet-collected stamps.
///
/// Implemented by the SQLite repository in `roam-storage`; tests use
/// in-memory implementations. Every call returns a fresh snapshot.
pub trait StampStore: Send + Sync {
    /// Stamps whose activity is running today and which `user` does not own yet.
    fn unobtained_stamps(&self, user: &UserId) -> Result<Vec<StampLocation>>;
}
