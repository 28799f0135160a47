// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Health Monitor - Background task driving the registry health sweep
//!
//! Periodically calls [`AgentRegistry::check_agent_health`] so agents that
//! stopped sending heartbeats are marked inactive.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** External scheduler for registry liveness checks

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::registry::AgentRegistry;

/// Health Monitor - Background task
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl HealthMonitor {
    /// Monitor sweeping at the registry's configured interval.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        let interval = registry.config().health_check_interval();
        Self::with_interval(registry, interval)
    }

    pub fn with_interval(registry: Arc<AgentRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the monitor background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            interval_seconds = self.interval.as_secs(),
            "Starting agent health monitor"
        );

        let mut tick = interval(self.interval);
        // The first tick completes immediately; agents have just registered.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let inactive = self.registry.check_agent_health().await;
                    if inactive.is_empty() {
                        debug!("Health sweep found no new inactive agents");
                    } else {
                        warn!(inactive = ?inactive, "Health sweep marked agents inactive");
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping health monitor");
                    break;
                }
            }
        }

        info!("Agent health monitor stopped");
    }
}
