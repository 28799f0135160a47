// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared messaging infrastructure handed to every agent of a node.

use std::sync::Arc;

use tracing::info;

use crate::domain::node_config::{AgentConfig, NexusConfig};
use crate::infrastructure::message_bus::MessageBus;
use crate::infrastructure::registry::AgentRegistry;

/// Bus, registry and agent loop settings. Cloning is cheap and every clone
/// refers to the same bus and registry.
#[derive(Clone)]
pub struct MessagingContext {
    bus: Arc<MessageBus>,
    registry: Arc<AgentRegistry>,
    agent_config: AgentConfig,
}

impl MessagingContext {
    pub fn new(config: &NexusConfig) -> Self {
        let bus = Arc::new(MessageBus::new(config.spec.bus.clone()));
        let registry = AgentRegistry::new(bus.clone(), config.spec.registry.clone());
        Self {
            bus,
            registry,
            agent_config: config.spec.agents.clone(),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn agent_config(&self) -> &AgentConfig {
        &self.agent_config
    }

    pub fn start(&self) {
        self.bus.start();
        info!("Message infrastructure started");
    }

    pub fn stop(&self) {
        self.bus.stop();
        info!("Message infrastructure stopped");
    }
}

impl Default for MessagingContext {
    fn default() -> Self {
        Self::new(&NexusConfig::default())
    }
}
