use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{StoreKind, TurnstileConfig};
use turnstile::http::{HttpServer, Turnstile};
use turnstile::ratelimit::{InMemoryWindowStore, ShardedWindowStore, Sweeper, WindowStore};

/// Request admission control for the knowledge-base API.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        store = ?config.server.store,
        "Configuration loaded"
    );

    let interval = config.server.sweep_interval();
    let retention = config.server.retention();
    let (store, sweeper) = match config.server.store {
        StoreKind::Memory => {
            let store = Arc::new(InMemoryWindowStore::new());
            let sweeper = Sweeper::spawn(store.clone(), interval, retention);
            (store as Arc<dyn WindowStore>, sweeper)
        }
        StoreKind::Sharded => {
            let store = Arc::new(ShardedWindowStore::new());
            let sweeper = Sweeper::spawn(store.clone(), interval, retention);
            (store as Arc<dyn WindowStore>, sweeper)
        }
    };

    let turnstile = Turnstile::new(store, config.limit_policy(), config.registration_policy());
    info!("Rate limiters initialized");

    let server = HttpServer::new(config.server.listen_addr, turnstile.router());

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.shutdown().await;
    info!("Turnstile stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
