use thiserror::Error;

/// Top-level error type for the roam backend.
///
/// Subsystem crates define their own error types where they need finer
/// variants and convert into `RoamError` at crate boundaries so that `?`
/// works across the workspace.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RoamError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Geolocation error: {0}")]
    Geo(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for RoamError {
    fn from(err: toml::de::Error) -> Self {
        RoamError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for RoamError {
    fn from(err: toml::ser::Error) -> Self {
        RoamError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RoamError {
    fn from(err: serde_json::Error) -> Self {
        RoamError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for roam operations.
pub type Result<T> = std::result::Result<T, RoamError>;
