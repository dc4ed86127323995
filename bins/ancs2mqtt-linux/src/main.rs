use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ancs2mqtt_host::{portal, run, BridgeSettings};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bridge notifications from a paired device to an MQTT broker.
#[derive(Debug, Parser)]
#[command(name = "ancs2mqtt", version)]
struct Args {
    /// Host settings file (JSON)
    #[arg(long, default_value = "ancs2mqtt.json")]
    settings: PathBuf,

    /// Override the configuration storage file
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Override the portal bind address
    #[arg(long)]
    portal: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,ancs2mqtt_core=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut settings = BridgeSettings::load(&args.settings)?;
    if let Some(storage) = args.storage {
        settings.storage_path = storage;
    }
    if let Some(portal) = args.portal {
        settings.portal_addr = portal;
    }

    tracing::info!("ancs2mqtt starting as {:?}", settings.name);
    tracing::info!("   Storage: {}", settings.storage_path.display());
    tracing::info!("   Portal:  http://{}/", settings.portal_addr);

    let (portal_handle, mut inbox) = portal::channel(16);
    let shutdown = Arc::new(AtomicBool::new(false));

    // Spawn the configuration portal
    let portal_addr = settings.portal_addr;
    let portal_task = tokio::spawn(async move {
        if let Err(e) = portal::serve(portal_addr, portal_handle).await {
            tracing::error!("Portal error: {}", e);
        }
    });

    // The supervisor owns blocking MQTT I/O, so it gets its own thread
    let flag = shutdown.clone();
    let mut supervisor_task =
        tokio::task::spawn_blocking(move || run(&settings, &mut inbox, &flag));

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = portal_task => {
            tracing::warn!("Portal stopped");
        }
        result = &mut supervisor_task => {
            match result {
                Ok(Ok(())) => tracing::warn!("Supervisor stopped"),
                Ok(Err(e)) => tracing::error!("Supervisor failed: {}", e),
                Err(e) => tracing::error!("Supervisor task panicked: {}", e),
            }
            return Ok(());
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    supervisor_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
