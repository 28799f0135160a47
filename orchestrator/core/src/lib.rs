// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! NEXUS Core
//!
//! In-process messaging and coordination substrate for cooperating agents:
//! message envelopes, bounded mailboxes, the message bus, the agent
//! registry and the agent runtime.
//!
//! # Architecture
//!
//! - **domain:** value types and configuration
//! - **infrastructure:** message bus and registry
//! - **application:** agent runtime, messaging context, health monitor

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use application::agent_runtime::{Agent, AgentBehavior, AgentState, MessageHandler, NoopBehavior};
pub use application::context::MessagingContext;
pub use application::health_monitor::HealthMonitor;
pub use domain::*;
pub use infrastructure::message_bus::{BusStats, InlineHandler, MessageBus};
pub use infrastructure::registry::{AgentRecord, AgentRegistry, RegistryError};
