//! WiFi Connection Manager - Main Entry Point

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wifi_connection_manager::{
    backend::SupplicantBackend,
    config::{CliArgs, Settings, load_profiles},
    core::dispatcher,
    transport::unix_socket::UnixSocketServer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wifi_connection_manager=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    info!(?args, "Starting WiFi connection manager");
    let settings = Settings::from(args);

    let profiles = match &settings.profiles {
        Some(path) => load_profiles(path).await.unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring stored profiles: {}", e);
            Vec::new()
        }),
        None => Vec::new(),
    };

    let backend = Arc::new(SupplicantBackend::connect(&settings.interface).await?);
    info!("Station backend initialized for interface: {}", settings.interface);

    let device = dispatcher::start(backend, settings.station.clone(), &profiles).await?;
    info!(profiles = profiles.len(), "Connection controller started");

    let mut tasks = Vec::new();

    if settings.enable_unix_socket {
        info!("Starting Unix socket transport on {}", settings.socket_path);

        let server = UnixSocketServer::new(
            settings.socket_path.clone(),
            settings.socket_mode,
            device.clone(),
        );
        let listener = server.bind().await?;

        tasks.push(tokio::spawn(async move {
            server.serve(listener).await;
        }));
    } else {
        info!("Unix socket transport disabled, running without a policy interface");
    }

    notify_systemd(true);

    info!("Service started successfully");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        }
        result = shutdown_signal() => {
            match result {
                Ok(()) => info!("Received SIGTERM, shutting down gracefully"),
                Err(e) => error!("SIGTERM handler failed: {}", e),
            }
        }
    }

    notify_systemd(false);

    for task in tasks {
        task.abort();
    }
    if let Err(e) = device.shutdown().await {
        warn!("controller already stopped: {}", e);
    }

    info!("Shutting down...");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    std::future::pending().await
}

#[cfg(feature = "systemd")]
fn notify_systemd(ready: bool) {
    let state = if ready {
        sd_notify::NotifyState::Ready
    } else {
        sd_notify::NotifyState::Stopping
    };
    if let Err(e) = sd_notify::notify(false, &[state]) {
        warn!("sd_notify failed: {}", e);
    }
}

#[cfg(not(feature = "systemd"))]
fn notify_systemd(_ready: bool) {}
