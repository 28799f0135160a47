// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Typed payloads for the messages the core itself emits: agent heartbeats
//! and registry liveness transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentStatus;
use crate::domain::message::{into_payload, Message, MessageKind, Payload};

/// Well-known id the registry answers to on the bus.
pub const REGISTRY_ID: &str = "registry";

/// Liveness of a registry entry as judged by heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Active,
    Inactive,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Active => "active",
            Liveness::Inactive => "inactive",
        }
    }
}

/// Body of a `heartbeat` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub agent_id: String,
    pub status: AgentStatus,
    pub timestamp: DateTime<Utc>,
    pub tasks_processed: u64,
    pub errors: u64,
}

impl HeartbeatReport {
    pub fn into_message(self) -> Message {
        let source = self.agent_id.clone();
        Message::new(MessageKind::Heartbeat, to_payload(&self), source).to(REGISTRY_ID)
    }

    /// Decode a heartbeat body. Returns `None` for other kinds or malformed
    /// payloads.
    pub fn from_message(message: &Message) -> Option<Self> {
        if message.kind() != &MessageKind::Heartbeat {
            return None;
        }
        serde_json::from_value(serde_json::Value::Object(message.payload().clone())).ok()
    }
}

/// Body of the `agent_status` event published when the health sweep changes
/// an entry's liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusChanged {
    pub agent_id: String,
    pub status: Liveness,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentStatusChanged {
    pub fn to_payload(&self) -> Payload {
        to_payload(self)
    }

    pub fn from_message(message: &Message) -> Option<Self> {
        if message.kind() != &MessageKind::AgentStatus {
            return None;
        }
        serde_json::from_value(serde_json::Value::Object(message.payload().clone())).ok()
    }
}

fn to_payload<T: Serialize>(value: &T) -> Payload {
    serde_json::to_value(value).map(into_payload).unwrap_or_default()
}
