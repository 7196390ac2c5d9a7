//! MQTT relay - main entry point
//!
//! Opens one shared broker connection, subscribes to the requested topic
//! filters and logs every message until interrupted.

use clap::{Parser, Subcommand};
use mqtt_relay::observability::logging::parse_spans_flag;
use mqtt_relay::observability::{init_default_logging, init_logging, LogFormat};
use mqtt_relay::transport::mqtt::connection::redact_broker_url;
use mqtt_relay::{ConnectionContext, RelayConfig, TopicMessage};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, Level};

/// Shared MQTT connection with topic-keyed listeners
#[derive(Parser)]
#[command(name = "mqtt-relay")]
#[command(about = "Subscribe to MQTT topics over a single managed connection")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log messages from the given topic filters
    Run {
        /// Topic filter to subscribe to (repeatable, wildcards allowed)
        #[arg(short, long = "topic", value_name = "FILTER", required = true)]
        topics: Vec<String>,
    },
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

    init_cli_logging(cli.verbose);

    info!("Starting mqtt-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { topics } => run_relay(config, topics).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// `-v` flags take precedence over `LOG_LEVEL`
fn init_cli_logging(verbose: u8) {
    let level = match verbose {
        0 => {
            init_default_logging();
            return;
        }
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
    let spans = parse_spans_flag(&std::env::var("LOG_SPANS").unwrap_or_default());
    init_logging(level, format, spans);
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(RelayConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["mqtt-relay.toml", "config/mqtt-relay.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(RelayConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found, reading MQTT_BROKER_URL from the environment");
            Ok(RelayConfig::from_env()?)
        }
    }
}

async fn run_relay(
    config: RelayConfig,
    topics: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let context = ConnectionContext::initialize(&config).await?;

    for topic in &topics {
        context
            .subscribe(topic, |msg: &TopicMessage| {
                info!(
                    topic = %msg.topic,
                    retain = msg.retain,
                    message = %msg.message,
                    "Message received"
                );
            })
            .await;
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(topics = ?topics, "Relay is running, waiting for messages");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    context.shutdown().await?;
    Ok(())
}

fn handle_config_command(
    mut config: RelayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        config.mqtt.broker_url = redact_broker_url(&config.mqtt.broker_url);
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    println!("Configuration is valid");
    Ok(())
}
