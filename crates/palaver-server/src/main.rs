//! Palaver relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory stores, TCP front end only (development)
//! palaver-server --bind 0.0.0.0:4040
//!
//! # Durable stores plus the WebSocket front end
//! palaver-server --bind 0.0.0.0:4040 --ws-bind 0.0.0.0:4041 --data palaver.redb
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use palaver_core::session::SessionConfig;
use palaver_server::{
    DriverConfig, HistoryStore, MemoryHistoryStore, MemoryUserDirectory, RedbStore, Server,
    ServerError, ServerRuntimeConfig, UserDirectory,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Palaver chat relay server
#[derive(Parser, Debug)]
#[command(name = "palaver-server")]
#[command(about = "Palaver two-party chat relay")]
#[command(version)]
struct Args {
    /// Address for the raw TCP front end
    #[arg(short, long, default_value = "0.0.0.0:4040")]
    bind: String,

    /// Address for the WebSocket front end (disabled when absent)
    #[arg(long)]
    ws_bind: Option<String>,

    /// Path to the redb database file (in-memory stores when absent)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Idle seconds before a silent connection is dropped
    #[arg(long, default_value = "220")]
    idle_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Palaver relay starting");
    tracing::info!("Binding TCP front end to {}", args.bind);
    if let Some(ws) = &args.ws_bind {
        tracing::info!("Binding WebSocket front end to {}", ws);
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        ws_bind_address: args.ws_bind,
        driver: DriverConfig {
            session: SessionConfig {
                idle_timeout: Duration::from_secs(args.idle_timeout_secs),
            },
            max_connections: args.max_connections,
        },
    };

    match args.data {
        Some(path) => {
            let store = RedbStore::open(&path)?;
            tracing::info!("Using redb storage at {}", path.display());
            serve(config, store.clone(), store).await?;
        },
        None => {
            tracing::warn!("No --data path provided - registrations and history will not survive restarts");
            serve(config, MemoryUserDirectory::new(), MemoryHistoryStore::new()).await?;
        },
    }

    Ok(())
}

/// Bind and run the relay with the chosen persistence collaborators.
async fn serve<D, H>(config: ServerRuntimeConfig, users: D, history: H) -> Result<(), ServerError>
where
    D: UserDirectory,
    H: HistoryStore,
{
    let server = Server::bind(config, users, history).await?;

    tracing::info!("Relay listening on {}", server.local_addr()?);
    if let Some(ws_addr) = server.ws_local_addr()? {
        tracing::info!("WebSocket front end listening on {}", ws_addr);
    }

    server.run().await
}
