// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Registry - Directory and liveness tracking for bus participants
//!
//! Keeps per-agent metadata (type, capabilities, counters), answers
//! discovery queries and judges liveness from heartbeats. The registry is
//! itself reachable on the bus as [`REGISTRY_ID`] so agents can address
//! heartbeats to it like any other message.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::agent::{AgentDescriptor, AgentPort};
use crate::domain::events::{AgentStatusChanged, HeartbeatReport, Liveness, REGISTRY_ID};
use crate::domain::mailbox::Mailbox;
use crate::domain::message::{Message, MessageKind};
use crate::domain::node_config::RegistryConfig;
use crate::infrastructure::message_bus::{InlineHandler, MessageBus};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Agent {0} is not registered")]
    UnknownAgent(String),

    #[error("Agent {0} is already registered")]
    AlreadyRegistered(String),

    #[error("Registration id {expected} does not match instance id {actual}")]
    IdMismatch { expected: String, actual: String },
}

struct RegistryEntry {
    descriptor: AgentDescriptor,
    status: Liveness,
    last_heartbeat: DateTime<Utc>,
    registered_at: DateTime<Utc>,
    message_count: u64,
    error_count: u64,
    instance: Arc<dyn AgentPort>,
}

impl RegistryEntry {
    fn record(&self) -> AgentRecord {
        AgentRecord {
            agent_id: self.descriptor.id.clone(),
            agent_type: self.descriptor.agent_type.clone(),
            capabilities: self.descriptor.capabilities.clone(),
            status: self.status,
            last_heartbeat: self.last_heartbeat,
            registered_at: self.registered_at,
            message_count: self.message_count,
            error_count: self.error_count,
        }
    }
}

/// Registry entry as exposed to callers: everything but the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub status: Liveness,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub message_count: u64,
    pub error_count: u64,
}

/// Bus-side presence of the registry. Heartbeats are consumed inline, so its
/// mailbox stays empty.
struct RegistryEndpoint {
    mailbox: Arc<Mailbox>,
}

impl AgentPort for RegistryEndpoint {
    fn agent_id(&self) -> &str {
        REGISTRY_ID
    }

    fn mailbox(&self) -> Arc<Mailbox> {
        self.mailbox.clone()
    }
}

struct HeartbeatSink {
    registry: Weak<AgentRegistry>,
    mailbox: Arc<Mailbox>,
}

#[async_trait::async_trait]
impl InlineHandler for HeartbeatSink {
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        self.mailbox.remove(message.id());

        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        let report = HeartbeatReport::from_message(&message)
            .ok_or_else(|| anyhow::anyhow!("Malformed heartbeat from {}", message.source()))?;
        registry.record_heartbeat(&report)?;
        Ok(())
    }
}

/// Directory of registered agents with heartbeat-driven liveness.
pub struct AgentRegistry {
    bus: Arc<MessageBus>,
    config: RegistryConfig,
    agents: RwLock<BTreeMap<String, RegistryEntry>>,
}

impl AgentRegistry {
    /// Create a registry bound to `bus` and attach its heartbeat endpoint.
    pub fn new(bus: Arc<MessageBus>, config: RegistryConfig) -> Arc<Self> {
        let registry = Arc::new(Self {
            bus,
            config,
            agents: RwLock::new(BTreeMap::new()),
        });
        registry.attach_endpoint();
        registry
    }

    fn attach_endpoint(self: &Arc<Self>) {
        let mailbox = Arc::new(Mailbox::new(self.bus.config().mailbox_capacity));
        self.bus.register_agent(Arc::new(RegistryEndpoint {
            mailbox: mailbox.clone(),
        }));
        let sink: Arc<dyn InlineHandler> = Arc::new(HeartbeatSink {
            registry: Arc::downgrade(self),
            mailbox,
        });
        self.bus
            .subscribe(REGISTRY_ID, MessageKind::Heartbeat, Some(sink));
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Record an agent and register its instance on the bus in one step.
    pub fn register_agent(
        &self,
        agent_id: &str,
        agent_type: &str,
        capabilities: &[String],
        instance: Arc<dyn AgentPort>,
    ) -> Result<(), RegistryError> {
        if instance.agent_id() != agent_id {
            return Err(RegistryError::IdMismatch {
                expected: agent_id.to_string(),
                actual: instance.agent_id().to_string(),
            });
        }

        let now = Utc::now();
        {
            let mut agents = self.agents.write();
            if agents.contains_key(agent_id) || agent_id == REGISTRY_ID {
                return Err(RegistryError::AlreadyRegistered(agent_id.to_string()));
            }
            agents.insert(
                agent_id.to_string(),
                RegistryEntry {
                    descriptor: AgentDescriptor::new(agent_id, agent_type, capabilities.iter().cloned()),
                    status: Liveness::Active,
                    last_heartbeat: now,
                    registered_at: now,
                    message_count: 0,
                    error_count: 0,
                    instance: instance.clone(),
                },
            );
        }
        self.bus.register_agent(instance);
        self.update_active_gauge();

        info!(
            agent_id = %agent_id,
            agent_type = %agent_type,
            capabilities = ?capabilities,
            "Registered agent"
        );
        Ok(())
    }

    pub fn unregister_agent(&self, agent_id: &str) -> Result<(), RegistryError> {
        if self.agents.write().remove(agent_id).is_none() {
            return Err(RegistryError::UnknownAgent(agent_id.to_string()));
        }
        self.bus.unregister_agent(agent_id);
        self.update_active_gauge();

        info!(agent_id = %agent_id, "Unregistered agent");
        Ok(())
    }

    /// Refresh the heartbeat timestamp and force the entry back to active.
    pub fn update_heartbeat(&self, agent_id: &str) -> Result<(), RegistryError> {
        self.touch(agent_id, Utc::now(), None)
    }

    /// Apply a heartbeat report: refresh liveness and copy its counters.
    pub fn record_heartbeat(&self, report: &HeartbeatReport) -> Result<(), RegistryError> {
        self.touch(&report.agent_id, Utc::now(), Some(report))
    }

    fn touch(
        &self,
        agent_id: &str,
        now: DateTime<Utc>,
        report: Option<&HeartbeatReport>,
    ) -> Result<(), RegistryError> {
        let revived = {
            let mut agents = self.agents.write();
            let entry = agents
                .get_mut(agent_id)
                .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))?;
            entry.last_heartbeat = now;
            if let Some(report) = report {
                entry.message_count = report.tasks_processed;
                entry.error_count = report.errors;
            }
            std::mem::replace(&mut entry.status, Liveness::Active) == Liveness::Inactive
        };

        if revived {
            info!(agent_id = %agent_id, "Agent is active again");
            self.update_active_gauge();
        } else {
            debug!(agent_id = %agent_id, "Heartbeat recorded");
        }
        Ok(())
    }

    /// Run one health sweep against the current time.
    pub async fn check_agent_health(&self) -> Vec<String> {
        self.check_agent_health_at(Utc::now()).await
    }

    /// Flip every active entry whose last heartbeat is older than the timeout
    /// to inactive and broadcast one `agent_status` event per transition.
    /// Returns the ids that changed, in id order.
    pub async fn check_agent_health_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = ChronoDuration::from_std(self.config.heartbeat_timeout())
            .unwrap_or_else(|_| ChronoDuration::seconds(60));

        let transitions: Vec<AgentStatusChanged> = {
            let mut agents = self.agents.write();
            agents
                .values_mut()
                .filter(|entry| entry.status == Liveness::Active && now - entry.last_heartbeat > timeout)
                .map(|entry| {
                    entry.status = Liveness::Inactive;
                    AgentStatusChanged {
                        agent_id: entry.descriptor.id.clone(),
                        status: Liveness::Inactive,
                        last_heartbeat: entry.last_heartbeat,
                    }
                })
                .collect()
        };

        if transitions.is_empty() {
            return Vec::new();
        }
        self.update_active_gauge();

        let mut changed = Vec::with_capacity(transitions.len());
        for event in transitions {
            warn!(
                agent_id = %event.agent_id,
                last_heartbeat = %event.last_heartbeat,
                "Agent appears to be inactive"
            );
            metrics::counter!("nexus_registry_agents_inactive_total").increment(1);
            self.bus
                .publish_event(MessageKind::AgentStatus, REGISTRY_ID, event.to_payload())
                .await;
            changed.push(event.agent_id);
        }
        changed
    }

    /// Ids of active agents declaring `capability`, sorted.
    pub fn find_agents_by_capability(&self, capability: &str) -> Vec<String> {
        self.find(|entry| entry.descriptor.has_capability(capability))
    }

    /// Ids of active agents of `agent_type`, sorted.
    pub fn find_agents_by_type(&self, agent_type: &str) -> Vec<String> {
        self.find(|entry| entry.descriptor.agent_type == agent_type)
    }

    fn find(&self, predicate: impl Fn(&RegistryEntry) -> bool) -> Vec<String> {
        self.agents
            .read()
            .values()
            .filter(|entry| entry.status == Liveness::Active && predicate(entry))
            .map(|entry| entry.descriptor.id.clone())
            .collect()
    }

    pub fn get_agent_info(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.read().get(agent_id).map(RegistryEntry::record)
    }

    /// Registered instance, for callers that need to reach the agent itself.
    pub fn get_instance(&self, agent_id: &str) -> Option<Arc<dyn AgentPort>> {
        self.agents
            .read()
            .get(agent_id)
            .map(|entry| entry.instance.clone())
    }

    pub fn get_all_agents(&self) -> BTreeMap<String, AgentRecord> {
        self.agents
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.record()))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.agents
            .read()
            .values()
            .filter(|entry| entry.status == Liveness::Active)
            .count()
    }

    fn update_active_gauge(&self) {
        metrics::gauge!("nexus_registry_active_agents").set(self.active_count() as f64);
    }
}
