//! Netring member agent
//!
//! Registers with the registry, runs the six supervised probe loops, and
//! serves the member HTTP surface until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, warn};

use netring_core::{config::MemberConfig, logging};
use netring_member::supervisor::{IterationFactory, Supervisor};
use netring_member::{http, MemberAgent};

#[derive(Parser, Debug)]
#[command(name = "netring-member", about = "Netring mesh probe member agent")]
struct Cli {
    /// Path to the YAML configuration file. Without it, configuration is
    /// read from NETRING_* environment variables.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MemberConfig::load(cli.config.as_deref())?;
    logging::init_logging(&config.logging)?;

    info!(
        location = %config.location,
        registry = %config.registry.url,
        "netring member starting"
    );

    // Registration failure is fatal: a member that cannot reach the
    // registry at startup exits non-zero.
    let agent = MemberAgent::init(config.clone()).await?;
    info!(
        instance_id = %agent.instance_id(),
        advertise_ip = %agent.advertise_ip(),
        "member initialized"
    );

    let supervisor = Arc::new(Supervisor::new(
        Duration::from_secs(config.fault_tolerance.task_timeout),
        Duration::from_secs(config.fault_tolerance.monitor_interval),
    ));

    register_loops(&supervisor, &agent, &config).await;
    supervisor.start_monitor().await;

    // HTTP surface with graceful shutdown driven by a watch channel.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let router = http::create_router(agent.clone(), supervisor.clone());
    let listen_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {listen_addr}: {e}"))?;
    info!(addr = %listen_addr, "member HTTP server listening");

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

    // Deregister while the HTTP session and loops are still alive, so the
    // final POST completes over the live connection pool.
    if let Err(e) = agent.deregister().await {
        warn!(error = %e, "graceful deregistration failed");
    }

    supervisor.shutdown().await;

    let _ = shutdown_tx.send(true);
    let _ = server_handle.await;

    info!("member shut down");
    Ok(())
}

/// Register the six periodic loops with their intervals and start delays.
///
/// The staggered initial delays give discovery two cycles before the
/// expensive bandwidth and traceroute probes first fire.
async fn register_loops(supervisor: &Arc<Supervisor>, agent: &Arc<MemberAgent>, config: &MemberConfig) {
    let intervals = &config.intervals;

    supervisor
        .register(
            "heartbeat",
            Duration::from_secs(intervals.heartbeat_interval),
            Duration::ZERO,
            loop_factory(agent, |agent| async move { agent.run_heartbeat().await }),
        )
        .await;
    supervisor
        .register(
            "discovery",
            Duration::from_secs(intervals.poll_interval),
            Duration::ZERO,
            loop_factory(agent, |agent| async move { agent.run_discovery().await }),
        )
        .await;
    supervisor
        .register(
            "connectivity_check",
            Duration::from_secs(intervals.check_interval),
            Duration::ZERO,
            loop_factory(agent, |agent| async move {
                agent.run_connectivity_checks().await
            }),
        )
        .await;
    supervisor
        .register(
            "bandwidth_test",
            Duration::from_secs(intervals.bandwidth_test_interval),
            Duration::from_secs(60),
            loop_factory(agent, |agent| async move {
                agent.run_bandwidth_tests().await
            }),
        )
        .await;
    supervisor
        .register(
            "traceroute",
            Duration::from_secs(intervals.traceroute_interval),
            Duration::from_secs(90),
            loop_factory(agent, |agent| async move { agent.run_traceroutes().await }),
        )
        .await;
    supervisor
        .register(
            "metric_report",
            Duration::from_secs(intervals.report_interval),
            Duration::from_secs(30),
            loop_factory(agent, |agent| async move { agent.run_report().await }),
        )
        .await;
}

fn loop_factory<F, Fut>(agent: &Arc<MemberAgent>, body: F) -> IterationFactory
where
    F: Fn(Arc<MemberAgent>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let agent = Arc::clone(agent);
    Arc::new(move || body(agent.clone()).boxed())
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
