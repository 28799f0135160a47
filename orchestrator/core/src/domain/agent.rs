// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Domain Types
//!
//! Identity, lifecycle status and the addressing port every bus participant
//! implements. The runnable agent itself lives in
//! [`crate::application::agent_runtime`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::mailbox::Mailbox;

/// Lifecycle status reported by an agent about itself.
///
/// Transitions: `Starting → Online → Stopping → Offline`, with `Error` when
/// initialization fails. Liveness as seen by the registry (active/inactive)
/// is tracked separately as [`crate::domain::events::Liveness`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Starting,
    Online,
    Stopping,
    Offline,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Starting => "starting",
            AgentStatus::Online => "online",
            AgentStatus::Stopping => "stopping",
            AgentStatus::Offline => "offline",
            AgentStatus::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static identity of an agent: who it is and what it can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique id within a registry (e.g. "log-ingester-001")
    pub id: String,
    /// Role classifier (e.g. "perception", "analysis", "remediation")
    pub agent_type: String,
    /// Declared skills used for discovery
    pub capabilities: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Point-in-time view of an agent's self-reported state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub tasks_processed: u64,
    pub errors: u64,
    pub queue_size: usize,
    #[serde(default)]
    pub in_flight: u64,
}

impl AgentSnapshot {
    /// Errors per dispatched task, with the denominator floored at 1.
    pub fn error_rate(&self) -> f64 {
        self.errors as f64 / self.tasks_processed.max(1) as f64
    }

    /// Seconds since the agent went through `start()`, zero if never started.
    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> f64 {
        self.started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

/// Addressing port for anything the message bus can deliver to.
///
/// The bus only needs an id and the participant's own mailbox; the registry
/// additionally reads snapshots for monitoring.
pub trait AgentPort: Send + Sync {
    fn agent_id(&self) -> &str;

    /// The participant's single mailbox. Must return the same mailbox on every
    /// call.
    fn mailbox(&self) -> Arc<Mailbox>;

    fn snapshot(&self) -> Option<AgentSnapshot> {
        None
    }
}

/// Lifecycle misuse and startup failures.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent {0} has already been started")]
    AlreadyStarted(String),

    #[error("Agent {0} is not running")]
    NotRunning(String),

    #[error("Agent {agent_id} failed to initialize: {source}")]
    InitializationFailed {
        agent_id: String,
        #[source]
        source: anyhow::Error,
    },
}
