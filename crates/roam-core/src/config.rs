use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, RoamError};

/// Top-level configuration for the roam backend.
///
/// Loaded from `~/.roam/config.toml` by default. Each section corresponds
/// to one subsystem; every section falls back to its defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoamConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl RoamConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RoamConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RoamError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// HTTP / WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path of the chat WebSocket endpoint.
    pub ws_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            ws_path: "/ws/chat".to_string(),
        }
    }
}

/// Which generation engine backs the chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineProvider {
    /// OpenAI-compatible chat-completions API.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Offline answers built from the stamp store, no language model.
    Scripted,
}

/// How the stream reconciler rebuilds its state when a snapshot does not
/// extend the text already sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    /// Append the new snapshot to the accumulated text.
    #[default]
    Concatenate,
    /// Replace the accumulated text with the new snapshot.
    Replace,
}

/// Generation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub provider: EngineProvider,
    /// Model name sent to the API.
    pub model: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Upper bound on a single query turn, in seconds.
    pub turn_timeout_secs: u64,
    pub reset_mode: ResetMode,
    /// Maximum tool-call rounds per turn before the engine gives up.
    pub max_tool_rounds: u32,
    /// Optional file replacing the built-in assistant instruction.
    pub instruction_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: EngineProvider::OpenAi,
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            turn_timeout_secs: 120,
            reset_mode: ResetMode::Concatenate,
            max_tool_rounds: 4,
            instruction_path: None,
        }
    }
}

/// Response format of an IP geolocation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoProviderKind {
    /// `{"status": "success", "lat", "lon", "city"}`
    IpApi,
    /// `{"latitude", "longitude", "city"}`
    IpapiCo,
    /// `{"latitude", "longitude", "city"}`
    FreeGeoIp,
}

/// One entry of the geolocation fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoProviderConfig {
    pub kind: GeoProviderKind,
    pub url: String,
}

/// Geolocation and ranking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Providers tried in order; the first complete answer wins.
    pub providers: Vec<GeoProviderConfig>,
    pub request_timeout_secs: u64,
    pub fallback_latitude: f64,
    pub fallback_longitude: f64,
    pub fallback_city: String,
    /// Number of nearby stamps returned by a ranking.
    pub nearby_limit: usize,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                GeoProviderConfig {
                    kind: GeoProviderKind::IpApi,
                    url: "http://ip-api.com/json/".to_string(),
                },
                GeoProviderConfig {
                    kind: GeoProviderKind::IpapiCo,
                    url: "https://ipapi.co/json/".to_string(),
                },
                GeoProviderConfig {
                    kind: GeoProviderKind::FreeGeoIp,
                    url: "https://freegeoip.app/json/".to_string(),
                },
            ],
            request_timeout_secs: 5,
            fallback_latitude: 25.0338,
            fallback_longitude: 121.5645,
            fallback_city: "Taipei".to_string(),
            nearby_limit: 3,
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding stamps, activities and ownership tokens.
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "~/.roam/data/roam.db".to_string(),
        }
    }
}
