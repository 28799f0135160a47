// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Analyzer - Incident detection and root cause analysis
//!
//! Consumes `log_analysis` events, opens an incident for every service whose
//! error rate is above the detection threshold and broadcasts
//! `incident_detected`. Answers `root_cause_request` with an
//! `analysis_result` produced by the configured [`Hypothesizer`], and
//! `update_incident_status` by moving a stored incident through its
//! lifecycle.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Analysis agent of the incident-response swarm

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};

use nexus_core::domain::node_config::DetectionConfig;
use nexus_core::{
    into_payload, Agent, AgentDescriptor, AgentState, Message, MessageHandler, MessageKind,
    MessagingContext, NoopBehavior,
};

use crate::application::{decode, field};
use crate::domain::hypothesis::{Hypothesizer, KeywordHypothesizer, RootCauseAnalysis};
use crate::domain::incident::{Incident, IncidentError, IncidentStatus};
use crate::domain::kinds;
use crate::domain::logs::LogAnalysisReport;

pub const ANALYZER_ID: &str = "analyzer-agent";

struct AnalyzerCore {
    threshold: f64,
    hypothesizer: Arc<dyn Hypothesizer>,
    incidents: RwLock<BTreeMap<String, Incident>>,
    sequence: AtomicU64,
}

impl AnalyzerCore {
    /// Per-service error rates over the report's entries. Services at or
    /// below the threshold produce nothing.
    fn detect(&self, report: &LogAnalysisReport, now: DateTime<Utc>) -> Vec<Incident> {
        let mut per_service: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for entry in &report.log_entries {
            let counts = per_service.entry(entry.service.as_str()).or_default();
            counts.1 += 1;
            if entry.is_error() {
                counts.0 += 1;
            }
        }

        let incidents: Vec<Incident> = per_service
            .into_iter()
            .filter(|(_, (errors, total))| *total > 0 && *errors as f64 / *total as f64 > self.threshold)
            .map(|(service, (errors, total))| {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
                Incident::high_error_rate(service, errors, total, self.threshold, sequence, now)
            })
            .collect();

        let mut stored = self.incidents.write();
        for incident in &incidents {
            stored.insert(incident.id.clone(), incident.clone());
        }
        incidents
    }

    async fn root_cause(&self, incident: &Incident) -> RootCauseAnalysis {
        let evidence = vec![
            format!("Incident: {}", incident.title),
            format!("Description: {}", incident.description),
            format!("Affected Services: {}", incident.affected_services.join(", ")),
            format!("Severity: {}", incident.severity),
            format!(
                "Detected At: {}",
                incident
                    .detected_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
        ];

        let analysis = match self.hypothesizer.analyze(incident, &evidence).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(incident_id = %incident.id, error = %e, "Hypothesizer failed, using fallback analysis");
                RootCauseAnalysis::fallback()
            }
        };

        if let Some(stored) = self.incidents.write().get_mut(&incident.id) {
            let now = Utc::now();
            stored.root_cause = Some(analysis.clone());
            stored.add_evidence(
                "root_cause_analysis",
                into_payload(json!({
                    "primary_cause": analysis.root_causes.first().map(|c| c.cause.clone()),
                    "confidence": analysis.confidence,
                })),
                now,
            );
            if stored.status == IncidentStatus::Open {
                // Open -> Investigating is always a valid transition.
                let _ = stored.update_status(IncidentStatus::Investigating, "Root cause analysis completed", now);
            }
        }
        info!(
            incident_id = %incident.id,
            confidence = analysis.confidence,
            "Root cause analysis completed"
        );
        analysis
    }

    fn update_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        reason: &str,
    ) -> Result<Incident, IncidentError> {
        let mut incidents = self.incidents.write();
        let incident = incidents
            .get_mut(incident_id)
            .ok_or_else(|| IncidentError::NotFound(incident_id.to_string()))?;
        incident.update_status(status, reason, Utc::now())?;
        let updated = incident.clone();
        drop(incidents);

        info!(incident_id = %incident_id, status = %status, "Incident status updated");
        if status == IncidentStatus::Resolved {
            metrics::counter!("nexus_incidents_resolved_total").increment(1);
        }
        Ok(updated)
    }
}

struct OnLogAnalysis {
    core: Arc<AnalyzerCore>,
}

#[async_trait]
impl MessageHandler for OnLogAnalysis {
    async fn handle(&self, agent: Arc<AgentState>, message: Message) -> anyhow::Result<Option<Message>> {
        let report: LogAnalysisReport = decode(&message)?;
        if report.log_entries.is_empty() {
            debug!(agent_id = %agent.id(), "log_analysis event carried no entries");
            return Ok(None);
        }

        let now = Utc::now();
        let incidents = self.core.detect(&report, now);
        if incidents.is_empty() {
            debug!(agent_id = %agent.id(), entries = report.log_entries.len(), "No incidents detected");
            return Ok(None);
        }

        for incident in &incidents {
            warn!(
                incident_id = %incident.id,
                severity = %incident.severity,
                error_rate = incident.error_rate,
                "Incident detected"
            );
            metrics::counter!(
                "nexus_incidents_detected_total",
                "severity" => incident.severity.as_str()
            )
            .increment(1);
        }

        let payload = into_payload(json!({
            "incidents": incidents,
            "analysis_timestamp": now.to_rfc3339(),
        }));
        agent.publish(MessageKind::IncidentDetected, payload).await;
        Ok(None)
    }
}

struct OnRootCauseRequest {
    core: Arc<AnalyzerCore>,
}

#[async_trait]
impl MessageHandler for OnRootCauseRequest {
    async fn handle(&self, agent: Arc<AgentState>, message: Message) -> anyhow::Result<Option<Message>> {
        let Some(incident) = field::<Incident>(&message, "incident")? else {
            debug!(agent_id = %agent.id(), message_id = %message.id(), "root_cause_request without incident");
            return Ok(None);
        };

        let analysis = self.core.root_cause(&incident).await;
        let payload = into_payload(json!({
            "root_cause_analysis": analysis,
            "incident_id": incident.id,
        }));
        Ok(Some(message.reply(MessageKind::AnalysisResult, payload, agent.id())))
    }
}

/// `update_incident_status {incident_id, status = "resolved", reason}`.
/// Unknown incidents and invalid transitions fail the handler, which the
/// runtime turns into an error reply.
struct OnUpdateStatus {
    core: Arc<AnalyzerCore>,
}

#[async_trait]
impl MessageHandler for OnUpdateStatus {
    async fn handle(&self, agent: Arc<AgentState>, message: Message) -> anyhow::Result<Option<Message>> {
        let incident_id: String = field(&message, "incident_id")?
            .ok_or_else(|| anyhow::anyhow!("update_incident_status requires incident_id"))?;
        let status: IncidentStatus = field(&message, "status")?.unwrap_or(IncidentStatus::Resolved);
        let reason: String = field(&message, "reason")?.unwrap_or_default();

        let incident = self.core.update_status(&incident_id, status, &reason)?;
        let payload = into_payload(json!({
            "incident_id": incident.id,
            "status": incident.status,
            "incident": incident,
        }));
        Ok(Some(message.reply(MessageKind::AnalysisResult, payload, agent.id())))
    }
}

/// The analysis agent.
pub struct Analyzer {
    agent: Arc<Agent>,
    core: Arc<AnalyzerCore>,
}

impl Analyzer {
    pub fn new(context: MessagingContext, detection: &DetectionConfig) -> Self {
        Self::with_hypothesizer(context, detection.error_rate_threshold, Arc::new(KeywordHypothesizer))
    }

    pub fn with_hypothesizer(
        context: MessagingContext,
        threshold: f64,
        hypothesizer: Arc<dyn Hypothesizer>,
    ) -> Self {
        let core = Arc::new(AnalyzerCore {
            threshold,
            hypothesizer,
            incidents: RwLock::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
        });
        let agent = Agent::new(
            AgentDescriptor::new(
                ANALYZER_ID,
                "analysis",
                ["log_analysis", "incident_detection", "root_cause_analysis"],
            ),
            context,
            Arc::new(NoopBehavior),
        );
        agent.register_handler(MessageKind::LogAnalysis, OnLogAnalysis { core: core.clone() });
        agent.register_handler(MessageKind::RootCauseRequest, OnRootCauseRequest { core: core.clone() });
        agent.register_handler(kinds::UPDATE_INCIDENT_STATUS, OnUpdateStatus { core: core.clone() });

        Self { agent, core }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn threshold(&self) -> f64 {
        self.core.threshold
    }

    /// Run detection over a report without going through the bus.
    pub fn analyze_report(&self, report: &LogAnalysisReport) -> Vec<Incident> {
        self.core.detect(report, Utc::now())
    }

    pub async fn analyze_root_cause(&self, incident: &Incident) -> RootCauseAnalysis {
        self.core.root_cause(incident).await
    }

    pub fn get_incident(&self, incident_id: &str) -> Option<Incident> {
        self.core.incidents.read().get(incident_id).cloned()
    }

    pub fn update_incident_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        reason: &str,
    ) -> Result<Incident, IncidentError> {
        self.core.update_status(incident_id, status, reason)
    }

    pub fn resolve_incident(&self, incident_id: &str, reason: &str) -> Result<Incident, IncidentError> {
        self.core.update_status(incident_id, IncidentStatus::Resolved, reason)
    }

    /// All incidents opened so far, ordered by id.
    pub fn incidents(&self) -> Vec<Incident> {
        self.core.incidents.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::incident::Severity;
    use crate::domain::logs::LogEntry;

    struct Broken;

    #[async_trait]
    impl Hypothesizer for Broken {
        async fn analyze(&self, _incident: &Incident, _evidence: &[String]) -> anyhow::Result<RootCauseAnalysis> {
            anyhow::bail!("model unavailable")
        }
    }

    fn report(entries: Vec<LogEntry>) -> LogAnalysisReport {
        LogAnalysisReport::from_entries(&entries, None)
    }

    fn entries(service: &str, ok: usize, errors: usize) -> Vec<LogEntry> {
        let mut out: Vec<LogEntry> = (0..ok).map(|_| LogEntry::new(service, "INFO", "ok")).collect();
        out.extend((0..errors).map(|_| LogEntry::new(service, "ERROR", "Database connection pool exhausted")));
        out
    }

    #[test]
    fn test_detects_only_services_above_threshold() {
        let analyzer = Analyzer::new(MessagingContext::default(), &DetectionConfig::default());

        let mut batch = entries("auth-service", 6, 4);
        batch.extend(entries("payment-service", 9, 1));
        let incidents = analyzer.analyze_report(&report(batch));

        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].affected_services, vec!["auth-service"]);
        assert_eq!(incidents[0].severity, Severity::High);
        assert_eq!(analyzer.incidents().len(), 1);
        assert!(analyzer.get_incident(&incidents[0].id).is_some());
    }

    #[test]
    fn test_rate_equal_to_threshold_is_not_an_incident() {
        let analyzer = Analyzer::with_hypothesizer(
            MessagingContext::default(),
            0.25,
            Arc::new(KeywordHypothesizer),
        );
        assert!(analyzer.analyze_report(&report(entries("svc", 3, 1))).is_empty());
    }

    #[tokio::test]
    async fn test_root_cause_attaches_to_stored_incident() {
        let analyzer = Analyzer::new(MessagingContext::default(), &DetectionConfig::default());
        let incident = analyzer.analyze_report(&report(entries("user-db", 1, 4))).remove(0);

        let analysis = analyzer.analyze_root_cause(&incident).await;
        assert!(!analysis.root_causes.is_empty());
        assert_eq!(
            analyzer.get_incident(&incident.id).unwrap().root_cause,
            Some(analysis)
        );
    }

    #[test]
    fn test_repeated_detection_keeps_both_incidents() {
        let analyzer = Analyzer::new(MessagingContext::default(), &DetectionConfig::default());
        let batch = report(entries("auth-service", 6, 4));

        let first = analyzer.analyze_report(&batch);
        let second = analyzer.analyze_report(&batch);

        assert_ne!(first[0].id, second[0].id);
        assert_eq!(analyzer.incidents().len(), 2);
    }

    #[tokio::test]
    async fn test_root_cause_moves_incident_to_investigating() {
        let analyzer = Analyzer::new(MessagingContext::default(), &DetectionConfig::default());
        let incident = analyzer.analyze_report(&report(entries("user-db", 1, 4))).remove(0);

        analyzer.analyze_root_cause(&incident).await;
        let stored = analyzer.get_incident(&incident.id).unwrap();

        assert_eq!(stored.status, IncidentStatus::Investigating);
        assert!(stored.evidence.iter().any(|e| e.kind == "root_cause_analysis"));
        assert_eq!(stored.timeline.len(), 2);
    }

    #[test]
    fn test_resolve_incident() {
        let analyzer = Analyzer::new(MessagingContext::default(), &DetectionConfig::default());
        let incident = analyzer.analyze_report(&report(entries("auth-service", 6, 4))).remove(0);

        let resolved = analyzer.resolve_incident(&incident.id, "Pool size raised").unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(analyzer.get_incident(&incident.id), Some(resolved));

        assert!(matches!(
            analyzer.resolve_incident(&incident.id, ""),
            Err(IncidentError::InvalidTransition { .. })
        ));
        assert_eq!(
            analyzer.resolve_incident("inc-missing", ""),
            Err(IncidentError::NotFound("inc-missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_update_status_request_reply() {
        let analyzer = Analyzer::new(MessagingContext::default(), &DetectionConfig::default());
        let incident = analyzer.analyze_report(&report(entries("auth-service", 6, 4))).remove(0);
        let handler = OnUpdateStatus {
            core: analyzer.core.clone(),
        };

        let request = Message::new(
            kinds::UPDATE_INCIDENT_STATUS,
            into_payload(json!({ "incident_id": incident.id, "reason": "fixed" })),
            "ops",
        )
        .to(ANALYZER_ID);
        let reply = handler
            .handle(analyzer.agent().state().clone(), request)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload()["status"], json!("resolved"));
        assert_eq!(reply.payload()["incident"]["timeline"][1]["details"], json!("fixed"));

        let unknown = Message::new(
            kinds::UPDATE_INCIDENT_STATUS,
            into_payload(json!({ "incident_id": "inc-missing" })),
            "ops",
        );
        assert!(handler
            .handle(analyzer.agent().state().clone(), unknown)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_hypothesizer_failure_falls_back() {
        let analyzer = Analyzer::with_hypothesizer(MessagingContext::default(), 0.15, Arc::new(Broken));
        let analysis = analyzer.analyze_root_cause(&Incident::default()).await;
        assert_eq!(analysis, RootCauseAnalysis::fallback());
    }

    #[tokio::test]
    async fn test_root_cause_request_reply() {
        let analyzer = Analyzer::new(MessagingContext::default(), &DetectionConfig::default());
        let incident = Incident::high_error_rate("auth-service", 5, 10, 0.15, 1, Utc::now());
        let request = Message::new(
            MessageKind::RootCauseRequest,
            into_payload(json!({ "incident": incident })),
            "ops",
        )
        .to(ANALYZER_ID);

        let reply = OnRootCauseRequest {
            core: analyzer.core.clone(),
        }
        .handle(analyzer.agent().state().clone(), request.clone())
        .await
        .unwrap()
        .unwrap();

        assert_eq!(reply.kind(), &MessageKind::AnalysisResult);
        assert_eq!(reply.target(), Some("ops"));
        assert_eq!(reply.correlation_id(), request.correlation_id());
        assert_eq!(reply.payload()["incident_id"], json!(incident.id));
        assert!(reply.payload()["root_cause_analysis"]["root_causes"].is_array());
    }
}
