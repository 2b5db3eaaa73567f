//! mview server
//!
//! Binary entry point for serving declared entity collections over REST.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mview::MviewServer;
use mview_common::config::MviewConfig;

#[derive(Parser, Debug)]
#[command(name = "mview")]
#[command(about = "REST semantics over declared entity collections", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mview.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, env = "MVIEW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Validate the configuration, list the resources and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let loaded = args.config.exists();
    let config: MviewConfig = if loaded {
        let content = std::fs::read_to_string(&args.config)?;
        toml::from_str(&content)?
    } else {
        MviewConfig::default()
    };

    // Initialize logging
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let json = config.logging.json;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)))
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();

    info!("mview v{}", env!("CARGO_PKG_VERSION"));
    if loaded {
        info!("Loaded configuration from {}", args.config.display());
    } else {
        info!("Using default configuration");
    }

    let server = MviewServer::new(config)?;

    if args.check {
        println!("{}", serde_json::to_string_pretty(&server.config().resources)?);
        info!("Configuration is valid");
        return Ok(());
    }

    // Handle shutdown signals
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        () = shutdown => {
            server.shutdown().await?;
        }
    }

    Ok(())
}
