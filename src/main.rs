//! Fleetbeat daemon entry point.
//!
//! Discovers peers on the local network segment over mDNS and
//! exchanges periodic metrics heartbeats with them over UDP.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio::signal;
use tokio::sync::watch;

mod config;
mod discovery;
mod listener;
mod metrics;
mod net;
mod peers;
mod poller;
mod protocol;
mod registry;

use config::Config;
use listener::ListenerContext;
use metrics::SystemMetrics;
use net::Identity;
use peers::PeerTable;
use registry::MetricsRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cfg = Config::load()?;
    let identity = Identity::detect(cfg.instance_name.as_deref())?;
    info!(
        "starting fleetbeat as {} ({}) with config: {:?}",
        identity.instance, identity.ip, cfg
    );

    // Shared state
    let table = Arc::new(PeerTable::new());
    let registry = Arc::new(MetricsRegistry::new());

    // Shutdown signal observed by every loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Datagram listener
    let listener_ctx = Arc::new(ListenerContext {
        identity: identity.clone(),
        reply_port: cfg.port,
        metrics: Arc::new(SystemMetrics),
        registry: Arc::clone(&registry),
    });
    let listener_cfg = cfg.clone();
    let listener_shutdown = shutdown_rx.clone();
    let mut listener_handle = tokio::spawn(async move {
        listener::run_listener(&listener_cfg, listener_ctx, listener_shutdown).await
    });

    // Discovery loop (advertise + browse/reconcile)
    let discovery_cfg = cfg.clone();
    let discovery_identity = identity.clone();
    let discovery_table = Arc::clone(&table);
    let discovery_shutdown = shutdown_rx.clone();
    let mut discovery_handle = tokio::spawn(async move {
        discovery::run_discovery(
            &discovery_cfg,
            discovery_identity,
            discovery_table,
            discovery_shutdown,
        )
        .await
    });

    // Metrics poll loop
    let poller_cfg = cfg.clone();
    let poller_table = Arc::clone(&table);
    let mut poller_handle =
        tokio::spawn(
            async move { poller::run_poller(&poller_cfg, poller_table, identity, shutdown_rx).await },
        );

    // Run until Ctrl+C or a fatal subsystem failure.
    let mut failure: Option<anyhow::Error> = None;
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("received Ctrl+C, shutting down..."),
            Err(e) => error!("unable to listen for shutdown signal: {}", e),
        },
        outcome = &mut listener_handle => failure = fatal("datagram listener", outcome),
        outcome = &mut discovery_handle => failure = fatal("discovery loop", outcome),
        outcome = &mut poller_handle => failure = fatal("metrics poller", outcome),
    }

    // Cooperative shutdown: flip the signal and wait for the loops to
    // observe it at their next suspension point.
    let _ = shutdown_tx.send(true);
    for handle in [listener_handle, discovery_handle, poller_handle] {
        if !handle.is_finished() {
            let _ = handle.await;
        }
    }

    match failure {
        Some(e) => Err(e),
        None => {
            info!("shutdown complete");
            Ok(())
        }
    }
}

/// Turn a finished subsystem task into the daemon's exit error.
fn fatal(name: &str, outcome: Result<Result<()>, tokio::task::JoinError>) -> Option<anyhow::Error> {
    let error = match outcome {
        Ok(Ok(())) => anyhow::anyhow!("{} exited unexpectedly", name),
        Ok(Err(e)) => e.context(format!("{} failed", name)),
        Err(e) => anyhow::anyhow!("{} panicked: {}", name, e),
    };
    error!("{:#}", error);
    Some(error)
}
