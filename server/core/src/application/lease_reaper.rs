// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lease Reaper - Background task evicting idle unconfirmed clients
//!
//! Runs the client registry's expiration sweep on a fixed interval, a
//! fraction of the lease time, so liveness bookkeeping stays off the request
//! path. Confirmed clients are never evicted by time alone.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Timer-driven scan-and-evict over the client registry

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::client_registry::ClientRegistry;
use crate::domain::server_config::LeaseConfig;

/// Configuration for the lease reaper
#[derive(Debug, Clone)]
pub struct LeaseReaperConfig {
    /// Lease granted to clients; unconfirmed records idle longer are evicted
    pub lease_time_seconds: u64,

    /// How often to sweep
    pub interval: Duration,

    pub enabled: bool,
}

impl Default for LeaseReaperConfig {
    fn default() -> Self {
        Self::from(&LeaseConfig::default())
    }
}

impl From<&LeaseConfig> for LeaseReaperConfig {
    fn from(lease: &LeaseConfig) -> Self {
        Self {
            lease_time_seconds: lease.lease_time_seconds,
            interval: Duration::from_secs(lease.effective_reaper_interval()),
            enabled: lease.reaper_enabled,
        }
    }
}

pub struct LeaseReaper {
    registry: Arc<ClientRegistry>,
    config: LeaseReaperConfig,
    shutdown_token: CancellationToken,
}

impl LeaseReaper {
    pub fn new(registry: Arc<ClientRegistry>, config: LeaseReaperConfig) -> Self {
        Self {
            registry,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn config(&self) -> &LeaseReaperConfig {
        &self.config
    }

    /// Start the reaper background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Lease reaper is disabled");
            return;
        }

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            lease_time_seconds = self.config.lease_time_seconds,
            "Starting lease reaper background task"
        );

        let period = if self.config.interval.is_zero() {
            warn!("Lease reaper interval is zero, sweeping every second");
            Duration::from_secs(1)
        } else {
            self.config.interval
        };
        let mut tick = interval(period);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let expired = self.sweep_cycle();
                    if expired > 0 {
                        info!(expired, "Lease reaper evicted idle clients");
                    } else {
                        debug!("Lease reaper cycle found nothing to evict");
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping lease reaper");
                    break;
                }
            }
        }

        info!("Lease reaper background task stopped");
    }

    /// Execute a single sweep, returning how many clients were evicted
    pub fn sweep_cycle(&self) -> usize {
        let now = self.registry.clock().now();
        self.registry
            .expire_idle_unconfirmed(now, self.config.lease_time_seconds)
            .len()
    }
}
