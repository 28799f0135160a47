// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Incident Response Swarm
//!
//! Owns the messaging context and the three incident-response agents, wires
//! their subscriptions and drives their lifecycle together with the registry
//! health monitor.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Composition root for one node's agents
//!
//! Event flow:
//!
//! ```text
//! log-ingester-001 --log_analysis--> analyzer-agent --incident_detected--> remediation-agent
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nexus_core::{
    AgentRecord, AgentSnapshot, BusStats, HealthMonitor, MessageKind, MessagingContext, NexusConfig,
};

use crate::application::analyzer::{Analyzer, ANALYZER_ID};
use crate::application::ingester::LogIngester;
use crate::application::remediator::{Remediator, REMEDIATOR_ID};
use crate::domain::hypothesis::{Hypothesizer, KeywordHypothesizer};
use crate::domain::incident::Incident;
use crate::domain::remediation::RemediationPlan;

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Everything an operator looks at after a run.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmSnapshot {
    pub agents: BTreeMap<String, AgentRecord>,
    pub agent_states: Vec<AgentSnapshot>,
    pub bus: BusStats,
    pub incidents: Vec<Incident>,
    pub plans: BTreeMap<String, RemediationPlan>,
}

struct MonitorHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

pub struct IncidentResponseSwarm {
    context: MessagingContext,
    ingester: LogIngester,
    analyzer: Analyzer,
    remediator: Remediator,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl IncidentResponseSwarm {
    pub fn new(config: &NexusConfig) -> anyhow::Result<Self> {
        Self::with_hypothesizer(config, Arc::new(KeywordHypothesizer))
    }

    /// Validate `config`, build and register the agents, and subscribe the
    /// analyzer to `log_analysis` and the remediator to `incident_detected`.
    pub fn with_hypothesizer(config: &NexusConfig, hypothesizer: Arc<dyn Hypothesizer>) -> anyhow::Result<Self> {
        config.validate().context("Invalid node configuration")?;
        let context = MessagingContext::new(config);
        let detection = &config.spec.detection;

        let ingester = LogIngester::new(context.clone(), detection);
        let analyzer =
            Analyzer::with_hypothesizer(context.clone(), detection.error_rate_threshold, hypothesizer);
        let remediator = Remediator::new(context.clone());

        ingester.agent().register()?;
        analyzer.agent().register()?;
        remediator.agent().register()?;

        let bus = context.bus();
        bus.subscribe(ANALYZER_ID, MessageKind::LogAnalysis, None);
        bus.subscribe(REMEDIATOR_ID, MessageKind::IncidentDetected, None);

        info!(node = %config.metadata.name, "Incident response swarm assembled");
        Ok(Self {
            context,
            ingester,
            analyzer,
            remediator,
            monitor: Mutex::new(None),
        })
    }

    pub fn context(&self) -> &MessagingContext {
        &self.context
    }

    pub fn ingester(&self) -> &LogIngester {
        &self.ingester
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn remediator(&self) -> &Remediator {
        &self.remediator
    }

    /// Start the bus, then the agents downstream-first so no event is
    /// published before its consumer is running, then the health monitor.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.context.start();
        self.remediator.agent().start().await?;
        self.analyzer.agent().start().await?;
        self.ingester.agent().start().await?;

        let monitor = Arc::new(HealthMonitor::new(self.context.registry().clone()));
        let shutdown = monitor.shutdown_token();
        let task = monitor.start();
        *self.monitor.lock().await = Some(MonitorHandle { shutdown, task });

        info!("Incident response swarm started");
        Ok(())
    }

    /// Stop the monitor and the agents in reverse start order, unregister
    /// them and stop the bus. Agents that are not running are skipped.
    pub async fn stop(&self) {
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.shutdown.cancel();
            if let Err(e) = monitor.task.await {
                warn!(error = %e, "Health monitor task ended abnormally");
            }
        }

        for agent in [self.ingester.agent(), self.analyzer.agent(), self.remediator.agent()] {
            if let Err(e) = agent.stop().await {
                warn!(agent_id = %agent.id(), error = %e, "Agent stop skipped");
            }
            if let Err(e) = agent.unregister() {
                warn!(agent_id = %agent.id(), error = %e, "Agent unregister skipped");
            }
        }

        self.context.stop();
        info!("Incident response swarm stopped");
    }

    /// Scan the configured log directory now.
    pub async fn ingest_logs_dir(&self) -> usize {
        self.ingester.scan_logs_dir().await
    }

    /// Wait until every agent mailbox is empty, no handler is running and no
    /// message was sent for one poll interval. Returns false on timeout.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last_sent = None;
        loop {
            let busy = [self.ingester.agent(), self.analyzer.agent(), self.remediator.agent()]
                .iter()
                .any(|agent| agent.snapshot().queue_size > 0 || agent.state().in_flight() > 0);
            let sent = self.context.bus().get_stats().message_stats.messages_sent;
            if !busy && last_sent == Some(sent) {
                return true;
            }
            last_sent = Some(sent);

            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    pub fn snapshot(&self) -> SwarmSnapshot {
        SwarmSnapshot {
            agents: self.context.registry().get_all_agents(),
            agent_states: [self.ingester.agent(), self.analyzer.agent(), self.remediator.agent()]
                .iter()
                .map(|agent| agent.snapshot())
                .collect(),
            bus: self.context.bus().get_stats(),
            incidents: self.analyzer.incidents(),
            plans: self.remediator.plans(),
        }
    }
}
