//! CLI argument definitions for the roam server.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Roam - streaming chat assistant for stamp-collecting activities.
#[derive(Parser, Debug)]
#[command(name = "roam", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Path to the SQLite stamp database.
    #[arg(short = 'd', long = "database")]
    pub database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Write a default configuration file if none exists, then exit.
    #[arg(long = "init-config")]
    pub init_config: bool,
}

impl CliArgs {
    /// Priority: --config flag > ROAM_CONFIG env var > ~/.roam/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("ROAM_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Priority: --port flag > ROAM_PORT env var > config file value > 5000.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        let env_port = std::env::var("ROAM_PORT")
            .ok()
            .and_then(|val| val.parse::<u16>().ok());
        pick_port(self.port, env_port, config_port)
    }

    pub fn resolve_database(&self) -> Option<String> {
        self.database
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn pick_port(flag: Option<u16>, env: Option<u16>, config_port: u16) -> u16 {
    flag.or(env)
        .unwrap_or(if config_port != 0 { config_port } else { 5000 })
}

fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".roam").join("config.toml");
    }
    PathBuf::from("config.toml")
}
