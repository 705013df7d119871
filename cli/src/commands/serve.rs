// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Foreground server host
//!
//! Wires the client registry, event bus and lease reaper together and keeps
//! them running until Ctrl+C or SIGTERM. Client lifecycle events are written
//! to the log as they are published.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use leasehold_core::application::{ClientRegistry, LeaseReaper, LeaseReaperConfig};
use leasehold_core::domain::server_config::ServerConfigManifest;
use leasehold_core::domain::time::SystemClock;
use leasehold_core::infrastructure::event_bus::{EventBus, EventBusError, EventReceiver};

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = ServerConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        name = %config.metadata.name,
        lease_time_seconds = config.spec.lease.lease_time_seconds,
        "Starting leasehold"
    );

    if let Some(metrics) = config
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.metrics.as_ref())
        .filter(|m| m.enabled)
    {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], metrics.port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port = metrics.port, "Prometheus exporter listening");
    }

    let event_bus = EventBus::with_default_capacity();
    let registry = Arc::new(ClientRegistry::new(
        Arc::new(SystemClock),
        Arc::new(event_bus.clone()),
    ));

    let reaper = Arc::new(LeaseReaper::new(
        registry.clone(),
        LeaseReaperConfig::from(&config.spec.lease),
    ));
    let shutdown = reaper.shutdown_token();
    let audit = spawn_event_log(event_bus.subscribe(), shutdown.clone());
    let reaper_handle = reaper.start();

    shutdown_signal().await;
    shutdown.cancel();

    reaper_handle.await.context("Lease reaper task failed")?;
    audit.await.context("Event log task failed")?;

    info!(clients = registry.len(), "leasehold stopped");
    Ok(())
}

fn spawn_event_log(
    mut events: EventReceiver,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => info!(client_id = %event.client_id(), event = ?event, "Client event"),
                    Err(EventBusError::Lagged(n)) => warn!(dropped = n, "Event log fell behind"),
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
