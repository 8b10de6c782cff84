//! Roam server binary - composition root.
//!
//! 1. Parse CLI args and load configuration from TOML
//! 2. Open the SQLite stamp store
//! 3. Build the geolocation chain, stamp capabilities and generation engine
//! 4. Start the axum server with the chat WebSocket

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use roam_chat::instruction::load_instruction;
use roam_chat::{ChatService, GenerationEngine, LocalEngine, OpenAiEngine, StampCapabilities, StampFinder};
use roam_core::config::{EngineConfig, EngineProvider, RoamConfig};
use roam_core::error::RoamError;
use roam_geo::IpLocator;
use roam_storage::{Database, StampRepository};

use roam_api::AppState;

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(path),
    }
}

fn build_engine(
    config: &EngineConfig,
    capabilities: Arc<dyn StampCapabilities>,
) -> Result<Arc<dyn GenerationEngine>, RoamError> {
    match config.provider {
        EngineProvider::OpenAi => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                RoamError::Config(format!("{} is not set", config.api_key_env))
            })?;
            let instruction = load_instruction(config.instruction_path.as_deref())?;
            tracing::info!(model = %config.model, base_url = %config.base_url, "Using OpenAI-compatible engine");
            Ok(Arc::new(OpenAiEngine::new(
                config,
                api_key,
                instruction,
                capabilities,
            )?))
        }
        EngineProvider::Scripted => {
            tracing::info!("Using offline engine");
            Ok(Arc::new(LocalEngine::new(capabilities)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    if args.init_config {
        if config_file.exists() {
            println!("{} already exists", config_file.display());
        } else {
            RoamConfig::default().save(&config_file)?;
            println!("Wrote default configuration to {}", config_file.display());
        }
        return Ok(());
    }

    let mut config = RoamConfig::load_or_default(&config_file);
    config.server.port = args.resolve_port(config.server.port);
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    if let Some(database) = args.resolve_database() {
        config.storage.database_path = database;
    }

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting roam v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let db_path = expand_home(&config.storage.database_path);
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");
    let repository = Arc::new(StampRepository::new(db));

    // Capabilities and engine.
    let locator = Arc::new(IpLocator::new(&config.geo)?);
    let finder: Arc<dyn StampCapabilities> = Arc::new(StampFinder::new(
        repository,
        locator,
        config.geo.nearby_limit,
    ));
    let engine = build_engine(&config.engine, finder)?;
    let chat = ChatService::new(engine, &config.engine);

    // Server.
    let state = AppState::new(config, chat);
    roam_api::start_server(state).await?;

    Ok(())
}
