//! usbcommd: serves the driver boundary against an emulated loopback device.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UnixListener;

use usbcomm_core::config::UsbCommConfig;
use usbcomm_services::{Dispatcher, DriverContext, LoopbackDevice};
use usbcommd::listener;

const EXPIRY_PERIOD: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = UsbCommConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = UsbCommConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        UsbCommConfig::default()
    });

    let socket_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.daemon.socket_path.clone());

    let context = Arc::new(DriverContext::from_config(&config));
    tracing::info!(
        version = %context.version.text(),
        read_timeout_ms = config.transfer.read_timeout_ms,
        write_retries = config.transfer.write_retries,
        "usbcommd starting"
    );

    let device = Arc::new(LoopbackDevice::new());
    let dispatcher = Arc::new(Dispatcher::new(device, context));

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("failed to remove stale socket {}", socket_path.display()))?;
    }
    let unix_listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;
    tracing::info!(path = %socket_path.display(), "listening");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────
    let serve_task = tokio::spawn(listener::serve(
        unix_listener,
        dispatcher.clone(),
        shutdown_tx.subscribe(),
    ));
    let expiry_task = tokio::spawn(listener::expiry_loop(dispatcher.clone(), EXPIRY_PERIOD));

    // ── Wait for exit ────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = serve_task         => tracing::error!("listener exited: {:?}", r),
        r = expiry_task        => tracing::error!("expiry task exited: {:?}", r),
    }

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::warn!(error = %e, "failed to remove socket");
    }
    Ok(())
}
