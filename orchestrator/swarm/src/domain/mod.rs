// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Incident-Response Domain Layer
//!
//! Pure types and rules for the incident-response agents. No I/O.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`logs`] | `LogEntry`, `LogSummary`, `Anomaly`, `LogAnalysisReport` |
//! | [`incident`] | `Incident`, `Severity`, `IncidentStatus`, `TimelineEntry`, `Evidence` |
//! | [`hypothesis`] | `Hypothesizer`, `KeywordHypothesizer`, `RootCauseAnalysis` |
//! | [`remediation`] | `IncidentType`, `RemediationPlan`, `Runbook`, `ScriptBundle` |

pub mod hypothesis;
pub mod incident;
pub mod logs;
pub mod remediation;

pub use hypothesis::{Hypothesizer, KeywordHypothesizer, RootCause, RootCauseAnalysis};
pub use incident::{Evidence, Incident, IncidentError, IncidentStatus, Severity, TimelineEntry};
pub use logs::{Anomaly, AnomalyKind, LogAnalysisReport, LogEntry, LogSummary};
pub use remediation::{IncidentType, QuickPlan, RemediationPlan, Runbook, ScriptBundle};

/// Message kinds specific to the incident-response agents.
pub mod kinds {
    pub const INGEST_LOGS: &str = "ingest_logs";
    pub const LOGS_INGESTED: &str = "logs_ingested";
    pub const GET_RECENT_LOGS: &str = "get_recent_logs";
    pub const RECENT_LOGS_RESPONSE: &str = "recent_logs_response";
    pub const UPDATE_INCIDENT_STATUS: &str = "update_incident_status";
}
