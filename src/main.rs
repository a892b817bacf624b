//! Broadcast relay entry point

use broadcast_relay::config::RelayConfig;
use broadcast_relay::dispatch::BroadcastDispatcher;
use broadcast_relay::observability::{health::HealthServer, init_default_logging};
use broadcast_relay::pump::{MessagePump, PumpSettings};
use broadcast_relay::status::StatusPublisher;
use broadcast_relay::transport::amqp::{AmqpConnector, BrokerEndpoint};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

const DEFAULT_CONFIG_PATHS: &[&str] = &["relay.toml", "config/relay.toml"];

/// Capacity of the in-process fan-out channel
const DISPATCH_CAPACITY: usize = 1024;

/// Relay broadcast events from RabbitMQ to the websocket fan-out service
#[derive(Parser)]
#[command(name = "broadcast-relay")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Raise log level (-v debug, -vv trace); ignored when LOG_LEVEL is set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and relay messages until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Print the configuration with secrets redacted
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if std::env::var("LOG_LEVEL").is_err() {
        match cli.verbose {
            0 => {}
            1 => std::env::set_var("LOG_LEVEL", "DEBUG"),
            _ => std::env::set_var("LOG_LEVEL", "TRACE"),
        }
    }
    init_default_logging();

    info!("Starting broadcast relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_relay(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(RelayConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(RelayConfig::load_from_file(path)?);
        }
    }

    Err(format!(
        "no configuration file found; pass -c/--config or create one of {}",
        DEFAULT_CONFIG_PATHS.join(", ")
    )
    .into())
}

async fn run_relay(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = BrokerEndpoint::from_config(&config.amqp)?;
    info!(
        broker = %endpoint.display_uri(),
        broadcast_exchange = %endpoint.broadcast_exchange,
        status_exchange = %endpoint.status_exchange,
        send_status_messages = endpoint.send_status_messages,
        "relay configured"
    );

    let dispatcher = BroadcastDispatcher::new(DISPATCH_CAPACITY);
    let publisher = StatusPublisher::from_endpoint(&endpoint);
    let pump = MessagePump::new(
        AmqpConnector::new(endpoint),
        Arc::new(dispatcher),
        publisher.clone(),
        PumpSettings::from_config(&config.amqp),
    );

    let health_task = if config.health.enabled {
        let health_server = HealthServer::new("broadcast-relay", config.health.port)
            .with_status_publisher(publisher);
        let follower = health_server.follow_pump(pump.state_watcher());
        let health_server = Arc::new(health_server);
        let server = tokio::spawn(async move {
            if let Err(e) = health_server.start().await {
                error!("Health server error: {}", e);
            }
        });
        Some((server, follower))
    } else {
        None
    };

    let pump_task = tokio::spawn(pump.run());

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }

    pump_task.abort();
    if let Some((server, follower)) = health_task {
        server.abort();
        follower.abort();
    }

    Ok(())
}

fn handle_config_command(config: &RelayConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    BrokerEndpoint::from_config(&config.amqp)?;

    if show {
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}
