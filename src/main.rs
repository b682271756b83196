//! Printer provisioner - Main Entry Point

use std::sync::Arc;

use clap::Parser;
use printer_provisioner::{
    backend::{BluezBackend, WifiCtrlScanner, codec::JsonFrameCodec},
    config::{CliArgs, Settings},
    core::{coordinator::SessionCoordinator, scanner::LocalScanService},
    transport::unix_socket::{RequestHandler, UnixSocketServer},
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,printer_provisioner=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    info!(?args, "Starting printer provisioner");
    let settings = Settings::from(args);

    let backend = Arc::new(
        BluezBackend::new(settings.adapter.as_deref(), settings.gatt, JsonFrameCodec).await?,
    );
    let coordinator = Arc::new(SessionCoordinator::new(backend, settings.coordinator));

    // Local scan is optional; provisioning works without suggestions
    let local_scan = match &settings.wifi_interface {
        Some(interface) => match WifiCtrlScanner::new(interface.clone()) {
            Ok(scanner) => {
                info!("Local scan enabled on {}", interface);
                Some(Arc::new(LocalScanService::new(Arc::new(scanner))))
            }
            Err(e) => {
                warn!("Local scan disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let handler = Arc::new(RequestHandler::new(coordinator.clone(), local_scan));
    let server = UnixSocketServer::new(settings.socket_path.clone(), settings.socket_mode, handler);
    let listener = server.bind().await?;

    let mut server_task = tokio::spawn(async move { server.serve(listener).await });

    notify_ready();
    info!("Service started successfully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        }
        _ = shutdown_signal() => {
            info!("Received SIGTERM, shutting down gracefully");
        }
        result = &mut server_task => {
            match result {
                Ok(Err(e)) => error!("Unix socket server error: {}", e),
                Err(e) => error!("Unix socket server task failed: {}", e),
                Ok(Ok(())) => info!("Unix socket server stopped"),
            }
        }
    }

    info!("Shutting down...");
    server_task.abort();
    coordinator.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}

#[cfg(feature = "systemd")]
fn notify_ready() {
    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        warn!("Failed to notify systemd: {}", e);
    }
}

#[cfg(not(feature = "systemd"))]
fn notify_ready() {}
