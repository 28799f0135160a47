// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Envelope
//!
//! The unit of communication between agents. A [`Message`] is a value type:
//! once built it is never mutated, and every routing step that needs a
//! different recipient produces a copy instead (see [`Message::copy_for`]).
//!
//! ## Record Format
//!
//! [`MessageRecord`] is the flat, transport-neutral shape used for logging
//! and for any persistence or cross-process collaborator:
//!
//! | Field | Type | Notes |
//! |-------|------|-------|
//! | `id` | string | UUID v4, unique per envelope |
//! | `timestamp` | string | ISO-8601 / RFC 3339 |
//! | `type` | string | [`MessageKind`] wire name |
//! | `payload` | object | opaque to the envelope |
//! | `source` | string | sender agent id |
//! | `target` | string or null | agent id, `"broadcast"`, `"*"` or unset |
//! | `correlation_id` | string | defaults to `id` |

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Structured message body: a string-keyed map of JSON values.
pub type Payload = serde_json::Map<String, Value>;

/// Reserved recipient meaning "every current subscriber of this kind".
pub const BROADCAST: &str = "broadcast";

/// Alternate spelling of [`BROADCAST`].
pub const BROADCAST_WILDCARD: &str = "*";

/// Message kinds understood by the core and the incident-response agents.
///
/// The set is open: any other wire name becomes [`MessageKind::Custom`].
/// Build kinds from strings with `MessageKind::from` so known names always
/// resolve to their dedicated variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    LogAnalysis,
    IncidentDetected,
    RootCauseRequest,
    RemediationRequest,
    AnalysisResult,
    AgentStatus,
    Heartbeat,
    Error,
    Ping,
    Pong,
    HeartbeatRequest,
    HeartbeatResponse,
    StatusRequest,
    StatusResponse,
    Custom(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::LogAnalysis => "log_analysis",
            MessageKind::IncidentDetected => "incident_detected",
            MessageKind::RootCauseRequest => "root_cause_request",
            MessageKind::RemediationRequest => "remediation_request",
            MessageKind::AnalysisResult => "analysis_result",
            MessageKind::AgentStatus => "agent_status",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Error => "error",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::HeartbeatRequest => "heartbeat_request",
            MessageKind::HeartbeatResponse => "heartbeat_response",
            MessageKind::StatusRequest => "status_request",
            MessageKind::StatusResponse => "status_response",
            MessageKind::Custom(name) => name,
        }
    }
}

impl From<&str> for MessageKind {
    fn from(name: &str) -> Self {
        match name {
            "log_analysis" => MessageKind::LogAnalysis,
            "incident_detected" => MessageKind::IncidentDetected,
            "root_cause_request" => MessageKind::RootCauseRequest,
            "remediation_request" => MessageKind::RemediationRequest,
            "analysis_result" => MessageKind::AnalysisResult,
            "agent_status" => MessageKind::AgentStatus,
            "heartbeat" => MessageKind::Heartbeat,
            "error" => MessageKind::Error,
            "ping" => MessageKind::Ping,
            "pong" => MessageKind::Pong,
            "heartbeat_request" => MessageKind::HeartbeatRequest,
            "heartbeat_response" => MessageKind::HeartbeatResponse,
            "status_request" => MessageKind::StatusRequest,
            "status_response" => MessageKind::StatusResponse,
            other => MessageKind::Custom(other.to_string()),
        }
    }
}

impl From<String> for MessageKind {
    fn from(name: String) -> Self {
        MessageKind::from(name.as_str())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for MessageKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MessageKind::from(s))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while rebuilding a [`Message`] from its record form.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Invalid message timestamp '{0}': expected ISO-8601")]
    InvalidTimestamp(String),

    #[error("Message record is missing a non-empty '{0}' field")]
    MissingField(&'static str),

    #[error("Malformed message record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Inter-agent message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "MessageRecord", try_from = "MessageRecord")]
pub struct Message {
    id: String,
    timestamp: DateTime<Utc>,
    kind: MessageKind,
    payload: Payload,
    source: String,
    target: Option<String>,
    correlation_id: String,
}

impl Message {
    /// Build a new unaddressed message. The correlation id defaults to the
    /// message's own id.
    pub fn new(kind: impl Into<MessageKind>, payload: Payload, source: impl Into<String>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            correlation_id: id.clone(),
            id,
            timestamp: Utc::now(),
            kind: kind.into(),
            payload,
            source: source.into(),
            target: None,
        }
    }

    /// Address the message to a specific recipient (or a broadcast sentinel).
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Address the message to every subscriber of its kind.
    pub fn broadcast(self) -> Self {
        self.to(BROADCAST)
    }

    /// Override the correlation id, typically with the id of a request this
    /// message answers.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Build a reply: addressed to this message's sender and carrying this
    /// message's correlation id unchanged.
    pub fn reply(
        &self,
        kind: impl Into<MessageKind>,
        payload: Payload,
        source: impl Into<String>,
    ) -> Message {
        Message::new(kind, payload, source)
            .to(self.source.clone())
            .with_correlation_id(self.correlation_id.clone())
    }

    /// Per-recipient copy used for broadcast fan-out. The copy gets a fresh id
    /// and shares kind, sender, payload, timestamp and correlation id.
    pub fn copy_for(&self, recipient: impl Into<String>) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            timestamp: self.timestamp,
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            source: self.source.clone(),
            target: Some(recipient.into()),
            correlation_id: self.correlation_id.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Look up a single payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// An unset target is treated the same as the broadcast sentinels.
    pub fn is_broadcast(&self) -> bool {
        match self.target.as_deref() {
            None => true,
            Some(target) => target == BROADCAST || target == BROADCAST_WILDCARD,
        }
    }

    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id.clone(),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            kind: self.kind.as_str().to_string(),
            payload: self.payload.clone(),
            source: self.source.clone(),
            target: self.target.clone(),
            correlation_id: Some(self.correlation_id.clone()),
        }
    }

    pub fn from_record(record: MessageRecord) -> Result<Self, MessageError> {
        if record.id.is_empty() {
            return Err(MessageError::MissingField("id"));
        }
        if record.kind.is_empty() {
            return Err(MessageError::MissingField("type"));
        }

        let timestamp = parse_timestamp(&record.timestamp)?;
        let correlation_id = record
            .correlation_id
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| record.id.clone());

        Ok(Self {
            id: record.id,
            timestamp,
            kind: MessageKind::from(record.kind),
            payload: record.payload,
            source: record.source,
            target: record.target,
            correlation_id,
        })
    }

    /// Record form as a JSON value, e.g. for embedding in an error reply.
    pub fn to_record_value(&self) -> Value {
        serde_json::to_value(self.to_record()).unwrap_or(Value::Null)
    }

    pub fn from_record_value(value: Value) -> Result<Self, MessageError> {
        let record: MessageRecord = serde_json::from_value(value)?;
        Self::from_record(record)
    }
}

/// Flat record form of a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Payload,
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl From<Message> for MessageRecord {
    fn from(message: Message) -> Self {
        message.to_record()
    }
}

impl TryFrom<MessageRecord> for Message {
    type Error = MessageError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        Message::from_record(record)
    }
}

/// Convert an arbitrary JSON value into a payload. Objects are used as-is;
/// anything else is wrapped under a `"value"` key.
pub fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => {
            let mut map = Payload::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MessageError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    // Naive timestamps (no offset) are interpreted as UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| MessageError::InvalidTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn sample() -> Message {
        Message::new(
            MessageKind::LogAnalysis,
            into_payload(json!({"entries": 3, "service": "auth-service"})),
            "ingester-1",
        )
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<String> = (0..500).map(|_| sample().id().to_string()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_correlation_defaults_to_own_id() {
        let message = sample();
        assert_eq!(message.correlation_id(), message.id());
    }

    #[test]
    fn test_reply_carries_correlation_and_targets_sender() {
        let request = sample().to("analyzer-1");
        let reply = request.reply(MessageKind::AnalysisResult, Payload::new(), "analyzer-1");

        assert_eq!(reply.correlation_id(), request.id());
        assert_eq!(reply.target(), Some("ingester-1"));
        assert_ne!(reply.id(), request.id());

        // A reply to the reply keeps the original correlation id.
        let second = reply.reply(MessageKind::Pong, Payload::new(), "ingester-1");
        assert_eq!(second.correlation_id(), request.id());
    }

    #[test]
    fn test_copy_for_shares_everything_but_id_and_target() {
        let original = sample().broadcast();
        let copy = original.copy_for("analyzer-1");

        assert_ne!(copy.id(), original.id());
        assert_eq!(copy.target(), Some("analyzer-1"));
        assert_eq!(copy.payload(), original.payload());
        assert_eq!(copy.kind(), original.kind());
        assert_eq!(copy.timestamp(), original.timestamp());
        assert_eq!(copy.correlation_id(), original.correlation_id());
        assert_eq!(copy.source(), original.source());
    }

    #[test]
    fn test_broadcast_detection() {
        assert!(sample().is_broadcast());
        assert!(sample().broadcast().is_broadcast());
        assert!(sample().to("*").is_broadcast());
        assert!(!sample().to("analyzer-1").is_broadcast());
    }

    #[test]
    fn test_record_roundtrip_preserves_fields() {
        let message = sample().to("analyzer-1").with_correlation_id("req-42");
        let restored = Message::from_record(message.to_record()).unwrap();

        assert_eq!(restored, message);
        assert_eq!(restored.correlation_id(), "req-42");
    }

    #[test]
    fn test_record_uses_wire_field_names() {
        let value = serde_json::to_value(sample().to("analyzer-1")).unwrap();
        let object = value.as_object().unwrap();

        for field in ["id", "timestamp", "type", "payload", "source", "target", "correlation_id"] {
            assert!(object.contains_key(field), "missing field {}", field);
        }
        assert_eq!(object["type"], "log_analysis");
    }

    #[test]
    fn test_from_record_accepts_naive_timestamp_and_missing_correlation() {
        let restored = Message::from_record_value(json!({
            "id": "abc",
            "timestamp": "2024-03-01T12:30:45.123456",
            "type": "ping",
            "payload": {},
            "source": "web",
            "target": null
        }))
        .unwrap();

        assert_eq!(restored.kind(), &MessageKind::Ping);
        assert_eq!(restored.correlation_id(), "abc");
        assert_eq!(restored.timestamp().to_rfc3339(), "2024-03-01T12:30:45.123456+00:00");
    }

    #[test]
    fn test_from_record_rejects_bad_timestamp() {
        let mut record = sample().to_record();
        record.timestamp = "yesterday".to_string();
        assert!(matches!(
            Message::from_record(record),
            Err(MessageError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_kind_names_resolve_to_variants() {
        assert_eq!(MessageKind::from("heartbeat"), MessageKind::Heartbeat);
        assert_eq!(MessageKind::from("status_response"), MessageKind::StatusResponse);
        assert_eq!(
            MessageKind::from("ingest_logs"),
            MessageKind::Custom("ingest_logs".to_string())
        );
        assert_eq!(MessageKind::from("ingest_logs").to_string(), "ingest_logs");
    }

    #[test]
    fn test_into_payload_wraps_scalars() {
        assert_eq!(into_payload(json!(7))["value"], json!(7));
        assert!(into_payload(Value::Null).is_empty());
    }
}
