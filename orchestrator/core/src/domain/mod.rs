// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod events;
pub mod mailbox;
pub mod message;
pub mod node_config;

pub use agent::{AgentDescriptor, AgentError, AgentPort, AgentSnapshot, AgentStatus};
pub use events::{AgentStatusChanged, HeartbeatReport, Liveness, REGISTRY_ID};
pub use mailbox::Mailbox;
pub use message::{into_payload, Message, MessageError, MessageKind, MessageRecord, Payload};
pub use node_config::{InlineDeliveryPolicy, NexusConfig};
