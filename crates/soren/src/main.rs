//! Soren Plugin
//!
//! Runs the code analysis demo plugin against a Soren agent.

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use soren_runtime::transport::NatsTransport;
use soren_runtime::{MemoryBus, SdkConfig, SharedTransport};

/// Soren demo plugin
#[derive(Parser, Debug)]
#[command(name = "soren-plugin")]
#[command(about = "Soren code analysis demo plugin", long_about = None)]
struct Args {
    /// TOML file with agent_uri, plugin_id and channels; env vars override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where accepted settings are saved
    #[arg(long, default_value = "my_database.json")]
    settings_file: PathBuf,

    /// Seconds to wait for the agent connection
    #[arg(long, default_value = "5")]
    connect_timeout: u64,

    /// Run on the in-process bus instead of connecting to the agent
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("soren=info,soren_runtime=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Soren plugin v{}", env!("CARGO_PKG_VERSION"));

    let config = match SdkConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(agent_uri = %config.normalized_uri(), plugin_id = %config.plugin_id, "Configuration loaded");

    let transport: SharedTransport = if args.memory {
        info!("Using in-process bus");
        Arc::new(MemoryBus::new())
    } else {
        let connect_timeout = Duration::from_secs(args.connect_timeout);
        match NatsTransport::connect(&config.agent_uri, &config.plugin_id, connect_timeout).await {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                error!("Cannot reach the agent: {}", e);
                std::process::exit(1);
            }
        }
    };

    let plugin = demo::build(config, transport, &args.settings_file).await?;

    let running = match plugin.start().await {
        Ok(running) => running,
        Err(e) if e.is_fatal_at_startup() => {
            error!("Plugin failed to start: {}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    info!("Plugin running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    running.shutdown().await?;

    Ok(())
}
