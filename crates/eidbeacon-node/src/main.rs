//! EID beacon node binary.
//!
//! # Usage
//!
//! ```bash
//! # Volatile run, factory URL in slot 0
//! eidbeacon-node
//!
//! # Durable state, custom URL, registration window open at start
//! eidbeacon-node --db beacon.redb --url https://example.com --registration
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use eidbeacon_node::{
    HostSensors, LoggingRadio, MemoryStorage, Node, NodeCommand, NodeConfig, NodeError,
    RedbStorage, Storage,
};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Eddystone EID beacon node
#[derive(Parser, Debug)]
#[command(name = "eidbeacon-node")]
#[command(about = "Eddystone beacon with rotating ephemeral identifiers")]
#[command(version)]
struct Args {
    /// Redb database for persisted state (in-memory when omitted)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Clock tick period in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Open the connectable registration window at start
    #[arg(long)]
    registration: bool,

    /// Factory URL for slot 0
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = NodeConfig {
        tick: Duration::from_millis(args.tick_ms),
        registration_at_start: args.registration,
        ..NodeConfig::default()
    };
    if let Some(url) = &args.url {
        config = config.with_url(url)?;
    }

    match &args.db {
        Some(path) => {
            tracing::info!(path = %path.display(), "opening beacon database");
            run(RedbStorage::open(path)?, config).await?;
        },
        None => {
            tracing::warn!("no --db given: configuration is lost on exit");
            run(MemoryStorage::new(), config).await?;
        },
    }

    Ok(())
}

async fn run<S: Storage>(storage: S, config: NodeConfig) -> Result<(), NodeError> {
    let node = Node::boot(storage, LoggingRadio::new(), HostSensors::default(), config)?;
    let (commands, receiver) = mpsc::channel(16);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received"),
            Err(err) => tracing::error!(%err, "cannot listen for interrupt"),
        }
        let _ = commands.send(NodeCommand::Shutdown).await;
    });

    let radio = node.run(receiver).await;
    tracing::info!(advertisements = radio.advertisements(), "beacon stopped");
    Ok(())
}
