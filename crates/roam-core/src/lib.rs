pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::RoamConfig;
pub use error::{Result, RoamError};
pub use store::StampStore;
pub use types::*;
