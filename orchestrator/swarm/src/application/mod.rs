// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Incident-Response Application Layer
//!
//! The three agent roles and the [`swarm::IncidentResponseSwarm`] that wires
//! them onto one messaging context.

pub mod analyzer;
pub mod ingester;
pub mod remediator;
pub mod swarm;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use nexus_core::{into_payload, Message, Payload};

/// Serialize a typed body into a message payload.
pub(crate) fn encode<T: Serialize>(body: &T) -> anyhow::Result<Payload> {
    Ok(into_payload(serde_json::to_value(body)?))
}

/// Decode the whole payload of `message` as `T`.
pub(crate) fn decode<T: DeserializeOwned>(message: &Message) -> anyhow::Result<T> {
    Ok(serde_json::from_value(Value::Object(message.payload().clone()))?)
}

/// Decode one payload field, `None` when absent or null.
pub(crate) fn field<T: DeserializeOwned>(message: &Message, key: &str) -> anyhow::Result<Option<T>> {
    match message.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}
