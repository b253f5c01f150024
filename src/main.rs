//! relaybridge daemon entry point

use clap::{Parser, Subcommand};
use relaybridge::bridge::Reconciler;
use relaybridge::config::BridgeConfig;
use relaybridge::hardware::UsbRelayTool;
use relaybridge::logging::init_default_logging;
use relaybridge::transport::mqtt::MqttClient;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// MQTT bridge for locally attached USB relay boards
#[derive(Parser)]
#[command(name = "relaybridge")]
#[command(about = "Bridge MQTT topics to USB relay switches")]
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
    /// Run the bridge
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting relaybridge v{}", env!("CARGO_PKG_VERSION"));

    // Configuration load failure is the only fatal error class
    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {e}");
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(BridgeConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["relay-bridge.toml", "config/relay-bridge.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(BridgeConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create relay-bridge.toml".into())
        }
    }
}

async fn run_bridge(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    info!(
        broker = %format!("{}:{}", config.mqtt.broker_host, config.mqtt.broker_port),
        relays = config.relays.len(),
        "Bridge starting"
    );

    let relays = Arc::new(UsbRelayTool::new(
        config.hardware.tool.clone(),
        Duration::from_secs(config.hardware.command_timeout_secs),
    ));

    let mut client = MqttClient::new(config.clone());
    let reconciler = Arc::new(Reconciler::new(config, relays, client.handle()));
    client.set_event_sink(reconciler).await;

    // Reconciliation runs inside the session supervisor on each ConnAck;
    // connect() returns after the first one is acknowledged.
    client.connect().await?;

    info!("Bridge is running; waiting for relay commands");

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }

    client.disconnect().await?;
    Ok(())
}

fn handle_config_command(
    config: BridgeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    info!("Configuration is valid");
    Ok(())
}
