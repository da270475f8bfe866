//! Gantry Daemon - Main entry point
//!
//! This is the daemon that manages the printer fleet and serves the
//! REST API.

mod api;
mod config;
mod registry;
mod server;
mod store;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(about = "Printer fleet daemon with network discovery and status API")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gantry.toml")]
    config: PathBuf,

    /// Bind address for the API server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single discovery pass and exit
    #[arg(long)]
    discover_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Gantry v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    if args.discover_once {
        // Single discovery mode
        info!("Running single discovery pass");
        let window = Duration::from_secs(config.discovery.window_secs);
        let printers = gantry_discovery::discover(window).await;
        println!("Discovered {} printers:", printers.len());
        for printer in printers {
            println!("  - {} at {} ({:?})", printer.name, printer.ip, printer.method);
            if let Some(serial) = &printer.serial {
                println!("    Serial: {}", serial);
            }
            if !printer.model.is_empty() {
                println!("    Model: {}", printer.model);
            }
        }
        return Ok(());
    }

    // Daemon mode
    let store = Arc::new(store::JsonStore::open(config.store.path.clone())?);
    let registry = Arc::new(registry::FleetRegistry::open(store)?);
    let state = Arc::new(server::AppState {
        registry,
        config: config.clone(),
    });

    server::run(state, &config.daemon.bind).await
}
