//! MQTT Bridge - Main Entry Point

use clap::{Parser, Subcommand};
use mqtt_bridge::config::{BridgeConfig, ConfigError};
use mqtt_bridge::observability::init_default_logging;
use mqtt_bridge::server::serve_stdio;
use mqtt_bridge::session::link::RumqttcConnector;
use mqtt_bridge::session::SessionManager;
use mqtt_bridge::tools::mqtt::register_mqtt_tools;
use mqtt_bridge::tools::ToolSystem;
use mqtt_bridge::BridgeResult;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// MQTT client operations exposed as agent-callable tools
#[derive(Parser)]
#[command(name = "mqtt-bridge")]
#[command(about = "MQTT client operations exposed as agent-callable tools")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tool calls over stdin/stdout
    Serve,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> BridgeResult<BridgeConfig> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(BridgeConfig::load_from_file(path)?)
        }
        None => {
            let default_path = PathBuf::from("bridge.toml");
            if default_path.exists() {
                info!("Loading configuration from: {}", default_path.display());
                return Ok(BridgeConfig::load_from_file(&default_path)?);
            }
            Ok(BridgeConfig::default())
        }
    }
}

async fn serve(config: BridgeConfig) -> BridgeResult<()> {
    info!("Starting MQTT bridge v{}", env!("CARGO_PKG_VERSION"));

    let session = Arc::new(SessionManager::new(
        Box::new(RumqttcConnector::new()),
        config.session_config(),
    ));

    let mut tools = ToolSystem::new();
    register_mqtt_tools(&mut tools, session.clone());
    let tools = Arc::new(tools);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Serving tool calls on stdin/stdout");

    tokio::select! {
        result = serve_stdio(tools) => {
            result?;
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    }

    // Best-effort release of the broker connection; exiting without it leaks
    // the background loop until the process dies.
    if let Err(e) = session.disconnect().await {
        warn!("Disconnect during shutdown failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

fn handle_config_command(config: BridgeConfig, show: bool) -> BridgeResult<()> {
    if show {
        let rendered = toml::to_string_pretty(&config).map_err(ConfigError::from)?;
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}
