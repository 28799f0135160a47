// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Incidents opened by the analyzer when a service's error rate crosses the
//! detection threshold, and their status lifecycle.
//!
//! Status moves between open, investigating and resolved in any direction,
//! so a resolved incident can regress to open. `closed` is terminal. Every
//! change is appended to the incident timeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use nexus_core::{into_payload, Payload};

use crate::domain::hypothesis::RootCauseAnalysis;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Bucket a service error rate: ≥ 0.5 critical, ≥ 0.3 high, ≥ 0.15
    /// medium, otherwise low.
    pub fn from_error_rate(rate: f64) -> Self {
        if rate >= 0.5 {
            Severity::Critical
        } else if rate >= 0.3 {
            Severity::High
        } else if rate >= 0.15 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    #[default]
    Open,
    Investigating,
    Resolved,
    Closed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Closed => "closed",
        }
    }

    /// Open and investigating incidents still need attention.
    pub fn is_active(&self) -> bool {
        matches!(self, IncidentStatus::Open | IncidentStatus::Investigating)
    }

    fn can_become(&self, next: IncidentStatus) -> bool {
        *self != next && *self != IncidentStatus::Closed
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IncidentError {
    #[error("Incident not found: {0}")]
    NotFound(String),

    #[error("Incident {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: IncidentStatus,
        to: IncidentStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Payload,
}

/// A detected incident. Every field has a default so partial incidents sent
/// by operators in `remediation_request` payloads still decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub affected_services: Vec<String>,
    pub detected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub error_rate: f64,
    pub confidence: f64,
    pub error_count: usize,
    pub total_logs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<RootCauseAnalysis>,
    pub evidence: Vec<Evidence>,
    pub timeline: Vec<TimelineEntry>,
}

impl Incident {
    /// Incident for `service` whose error rate exceeded `threshold`.
    /// `sequence` keeps ids unique when one service trips twice within the
    /// same second.
    pub fn high_error_rate(
        service: &str,
        error_count: usize,
        total_logs: usize,
        threshold: f64,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let error_rate = if total_logs == 0 {
            0.0
        } else {
            error_count as f64 / total_logs as f64
        };
        let mut incident = Self {
            id: format!("inc-{}-{}-{}", now.format("%Y%m%d%H%M%S"), service, sequence),
            title: format!("High Error Rate in {}", service),
            description: format!(
                "Error rate of {:.1}% detected in {} (threshold: {:.1}%)",
                error_rate * 100.0,
                service,
                threshold * 100.0
            ),
            severity: Severity::from_error_rate(error_rate),
            status: IncidentStatus::Open,
            affected_services: vec![service.to_string()],
            detected_at: Some(now),
            updated_at: Some(now),
            resolved_at: None,
            error_rate,
            confidence: (error_rate * 2.0).min(0.9),
            error_count,
            total_logs,
            root_cause: None,
            evidence: Vec::new(),
            timeline: Vec::new(),
        };
        incident.add_evidence(
            "error_rate",
            into_payload(json!({
                "service": service,
                "error_count": error_count,
                "total_logs": total_logs,
                "error_rate": error_rate,
                "threshold": threshold,
            })),
            now,
        );
        incident.add_timeline_entry("Incident detected", incident.description.clone(), now);
        incident
    }

    pub fn add_timeline_entry(&mut self, event: impl Into<String>, details: impl Into<String>, now: DateTime<Utc>) {
        self.timeline.push(TimelineEntry {
            timestamp: now,
            event: event.into(),
            details: details.into(),
        });
        self.updated_at = Some(now);
    }

    pub fn add_evidence(&mut self, kind: impl Into<String>, data: Payload, now: DateTime<Utc>) {
        self.evidence.push(Evidence {
            kind: kind.into(),
            timestamp: now,
            data,
        });
    }

    /// Move to `status`, recording the change and `reason` on the timeline.
    /// Staying in the same status and leaving `closed` are rejected.
    pub fn update_status(
        &mut self,
        status: IncidentStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), IncidentError> {
        let from = self.status;
        if !from.can_become(status) {
            return Err(IncidentError::InvalidTransition {
                id: self.id.clone(),
                from,
                to: status,
            });
        }

        self.status = status;
        self.resolved_at = match status {
            IncidentStatus::Resolved => Some(now),
            IncidentStatus::Closed => self.resolved_at.or(Some(now)),
            IncidentStatus::Open | IncidentStatus::Investigating => None,
        };
        self.add_timeline_entry(format!("Status changed from {} to {}", from, status), reason, now);
        Ok(())
    }

    pub fn resolve(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), IncidentError> {
        self.update_status(IncidentStatus::Resolved, reason, now)
    }

    /// Title and description, lowercased, for keyword classification.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.description).to_lowercase()
    }

    pub fn primary_service(&self) -> &str {
        self.affected_services
            .first()
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}
