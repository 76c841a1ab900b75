//! relayclaw - Real-time channel relay between humans and AI agents

use anyhow::Result;
use clap::{Parser, Subcommand};
use relayclaw::{
    config::Config,
    gateway::GatewayBuilder,
    store::{hash_secret, MemoryStore},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relayclaw")]
#[command(version)]
#[command(about = "Real-time channel relay between humans and AI agents")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RELAYCLAW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay gateway
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show effective configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },

    /// Hash a channel secret for the config file
    HashSecret {
        /// The secret to hash
        secret: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("relayclaw={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Serve { host, port } => {
            run_serve(config, host, port).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
        Commands::HashSecret { secret } => {
            println!("{}", hash_secret(&secret));
        }
    }

    Ok(())
}

async fn run_serve(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    tracing::info!("Starting relayclaw gateway");
    if config.channels.is_empty() {
        tracing::warn!("No channels configured; every upgrade will be refused");
    }

    let store = Arc::new(MemoryStore::from_seeds(&config.channels));

    let mut builder = GatewayBuilder::new().config(config.gateway).store(store);
    if let Some(host) = host {
        builder = builder.host(host);
    }
    if let Some(port) = port {
        builder = builder.port(port);
    }
    let gateway = Arc::new(builder.build());

    let listener = gateway.bind().await?;
    let runner = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.run(listener).await })
    };

    tracing::info!("Gateway is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    gateway.stop().await;
    runner.await??;

    Ok(())
}

fn show_config(config: Option<&Config>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
