//! Netring registry service
//!
//! Coordinates membership, aggregates metric reports into the topology
//! engine, and serves the dashboard APIs. Stateless across restarts
//! modulo the store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use netring_core::{config::RegistryConfig, logging, RedisStore, Store};
use netring_registry::{cleanup, handlers, AppState};

#[derive(Parser, Debug)]
#[command(name = "netring-registry", about = "Netring mesh probe registry service")]
struct Cli {
    /// Path to the YAML configuration file. Without it, configuration is
    /// read from NETRING_* environment variables.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RegistryConfig::load(cli.config.as_deref())?;
    logging::init_logging(&config.logging)?;

    info!(
        redis = %config.redis.host,
        member_ttl = config.member_ttl,
        "netring registry starting"
    );

    let store: Arc<dyn Store> = Arc::new(RedisStore::new(&config.redis.url())?);
    let state = AppState::build(store, &config)?;

    let cancel = CancellationToken::new();
    let cleanup_handle = cleanup::spawn_cleanup_loop(
        state.membership.clone(),
        Duration::from_secs(config.cleanup_interval),
        cancel.child_token(),
    );
    let missing_check_handle = state.expected.clone().map(|expected| {
        netring_registry::expected::spawn_missing_check_loop(
            state.membership.clone(),
            expected,
            Duration::from_secs(config.expected_members.missing_check_interval),
            cancel.child_token(),
        )
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let router = handlers::create_router(state);
    let listen_addr = config.http_address();
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {listen_addr}: {e}"))?;
    info!(addr = %listen_addr, "registry HTTP server listening");

    let server_handle = tokio::spawn(async move {
        let mut rx = shutdown_rx;
        let graceful = async move {
            let _ = rx.changed().await;
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
        {
            error!("HTTP server error: {}", e);
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    cancel.cancel();
    let _ = cleanup_handle.await;
    if let Some(handle) = missing_check_handle {
        let _ = handle.await;
    }
    let _ = shutdown_tx.send(true);
    let _ = server_handle.await;

    info!("registry shut down");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
