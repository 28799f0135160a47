// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Remediator - Remediation planning agent
//!
//! Builds a [`RemediationPlan`] for every incident announced on the bus and
//! answers `remediation_request` messages with plans, runbooks or scripts.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, info};

use nexus_core::{
    into_payload, Agent, AgentDescriptor, AgentState, Message, MessageHandler, MessageKind,
    MessagingContext, NoopBehavior,
};

use crate::application::field;
use crate::domain::incident::Incident;
use crate::domain::remediation::{
    IncidentType, QuickPlan, RemediationPlan, Runbook, ScriptBundle, DEFAULT_RUNBOOK,
};

pub const REMEDIATOR_ID: &str = "remediation-agent";

#[derive(Default)]
struct RemediatorCore {
    plans: RwLock<BTreeMap<String, RemediationPlan>>,
}

impl RemediatorCore {
    fn plan_for(&self, incident: &Incident) -> RemediationPlan {
        let plan = RemediationPlan::for_incident(incident, Utc::now());
        info!(
            incident_id = %incident.id,
            incident_type = %plan.incident_type,
            steps = plan.detailed_steps.len(),
            "Generated remediation plan"
        );
        metrics::counter!("nexus_remediation_plans_total").increment(1);
        self.plans.write().insert(incident.id.clone(), plan.clone());
        plan
    }
}

/// Accepts `{incidents: [...]}` as broadcast by the analyzer, or a single
/// `{incident}`.
struct OnIncidentDetected {
    core: Arc<RemediatorCore>,
}

#[async_trait]
impl MessageHandler for OnIncidentDetected {
    async fn handle(&self, agent: Arc<AgentState>, message: Message) -> anyhow::Result<Option<Message>> {
        let mut incidents: Vec<Incident> = field(&message, "incidents")?.unwrap_or_default();
        if let Some(single) = field::<Incident>(&message, "incident")? {
            incidents.push(single);
        }
        if incidents.is_empty() {
            debug!(agent_id = %agent.id(), message_id = %message.id(), "incident_detected without incidents");
        }
        for incident in &incidents {
            self.core.plan_for(incident);
        }
        Ok(None)
    }
}

/// `remediation_request {request_type: full_plan | runbook | scripts, ...}`
struct OnRemediationRequest {
    core: Arc<RemediatorCore>,
}

#[async_trait]
impl MessageHandler for OnRemediationRequest {
    async fn handle(&self, agent: Arc<AgentState>, message: Message) -> anyhow::Result<Option<Message>> {
        let request_type: String = field(&message, "request_type")?.unwrap_or_else(|| "full_plan".to_string());
        let incident_type = field::<String>(&message, "incident_type")?
            .map(|name| IncidentType::from_name(&name))
            .unwrap_or_default();
        let now = Utc::now();

        let body: Value = match request_type.as_str() {
            "runbook" => {
                let name: String =
                    field(&message, "runbook_type")?.unwrap_or_else(|| DEFAULT_RUNBOOK.to_string());
                json!({ "runbook": Runbook::named(&name, now) })
            }
            "scripts" => json!({ "scripts": ScriptBundle::for_type(incident_type, now) }),
            _ => {
                if let Some(incident) = field::<Incident>(&message, "incident")? {
                    let plan = self.core.plan_for(&incident);
                    json!({ "remediation_plan": plan, "incident_id": incident.id })
                } else if let Some(plan) = field::<String>(&message, "incident_id")?
                    .and_then(|id| self.core.plans.read().get(&id).cloned())
                {
                    json!({ "incident_id": plan.incident_id, "remediation_plan": plan })
                } else {
                    json!({ "remediation_plan": QuickPlan::for_type(incident_type, now) })
                }
            }
        };

        Ok(Some(message.reply(MessageKind::AnalysisResult, into_payload(body), agent.id())))
    }
}

/// The remediation agent.
pub struct Remediator {
    agent: Arc<Agent>,
    core: Arc<RemediatorCore>,
}

impl Remediator {
    pub fn new(context: MessagingContext) -> Self {
        let core = Arc::new(RemediatorCore::default());
        let agent = Agent::new(
            AgentDescriptor::new(
                REMEDIATOR_ID,
                "remediation",
                ["remediation_planning", "runbook_generation"],
            ),
            context,
            Arc::new(NoopBehavior),
        );
        agent.register_handler(MessageKind::IncidentDetected, OnIncidentDetected { core: core.clone() });
        agent.register_handler(MessageKind::RemediationRequest, OnRemediationRequest { core: core.clone() });

        Self { agent, core }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Build and keep the plan for `incident`.
    pub fn generate_plan(&self, incident: &Incident) -> RemediationPlan {
        self.core.plan_for(incident)
    }

    pub fn get_plan(&self, incident_id: &str) -> Option<RemediationPlan> {
        self.core.plans.read().get(incident_id).cloned()
    }

    pub fn plans(&self) -> BTreeMap<String, RemediationPlan> {
        self.core.plans.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::incident::Severity;

    fn incident(id: &str, description: &str) -> Incident {
        Incident {
            id: id.to_string(),
            description: description.to_string(),
            severity: Severity::High,
            affected_services: vec!["web-01".to_string()],
            ..Incident::default()
        }
    }

    async fn request(remediator: &Remediator, body: Value) -> Message {
        let message = Message::new(MessageKind::RemediationRequest, into_payload(body), "ops")
            .to(REMEDIATOR_ID);
        OnRemediationRequest {
            core: remediator.core.clone(),
        }
        .handle(remediator.agent().state().clone(), message)
        .await
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn test_incident_detected_stores_plans() {
        let remediator = Remediator::new(MessagingContext::default());
        let message = Message::new(
            MessageKind::IncidentDetected,
            into_payload(json!({
                "incidents": [incident("inc-a", "CPU pegged"), incident("inc-b", "disk full")],
            })),
            "analyzer-agent",
        );

        let reply = OnIncidentDetected {
            core: remediator.core.clone(),
        }
        .handle(remediator.agent().state().clone(), message)
        .await
        .unwrap();

        assert!(reply.is_none());
        let plans = remediator.plans();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans["inc-a"].incident_type, IncidentType::HighCpu);
        assert_eq!(plans["inc-b"].incident_type, IncidentType::DiskSpace);
    }

    #[tokio::test]
    async fn test_runbook_request() {
        let remediator = Remediator::new(MessagingContext::default());
        let reply = request(&remediator, json!({ "request_type": "runbook" })).await;

        assert_eq!(reply.kind(), &MessageKind::AnalysisResult);
        assert_eq!(reply.payload()["runbook"]["type"], json!(DEFAULT_RUNBOOK));
        assert_eq!(reply.payload()["runbook"]["steps"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_scripts_request() {
        let remediator = Remediator::new(MessagingContext::default());
        let reply = request(
            &remediator,
            json!({ "request_type": "scripts", "incident_type": "memory_exhaustion" }),
        )
        .await;

        let diagnosis = reply.payload()["scripts"]["diagnosis_script"].as_str().unwrap();
        assert!(diagnosis.contains("free -h"));
    }

    #[tokio::test]
    async fn test_full_plan_variants() {
        let remediator = Remediator::new(MessagingContext::default());

        let with_incident = request(&remediator, json!({ "incident": incident("inc-x", "OOM") })).await;
        assert_eq!(with_incident.payload()["incident_id"], json!("inc-x"));
        assert_eq!(
            with_incident.payload()["remediation_plan"]["incident_type"],
            json!("memory_exhaustion")
        );

        let by_id = request(&remediator, json!({ "incident_id": "inc-x" })).await;
        assert_eq!(by_id.payload()["remediation_plan"]["incident_id"], json!("inc-x"));

        let by_type = request(&remediator, json!({ "incident_type": "network_latency" })).await;
        assert_eq!(by_type.payload()["remediation_plan"]["priority"], json!("medium"));
    }
}
