// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests of the incident-response swarm over a real bus.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use nexus_core::{
    into_payload, Agent, AgentDescriptor, AgentState, AgentStatus, Liveness, Message, MessageKind,
    NexusConfig, NoopBehavior,
};
use nexus_swarm::domain::kinds;
use nexus_swarm::{
    Hypothesizer, Incident, IncidentResponseSwarm, IncidentStatus, IncidentType, KeywordHypothesizer,
    RootCauseAnalysis, Severity, ANALYZER_ID, LOG_INGESTER_ID, REMEDIATOR_ID,
};

fn config(logs_dir: &Path) -> NexusConfig {
    let mut config = NexusConfig::default();
    config.spec.agents.poll_interval_ms = 10;
    config.spec.detection.logs_dir = logs_dir.to_path_buf();
    config.spec.detection.scan_interval_secs = 3600;
    config
}

fn write_incident_log(dir: &Path) {
    let mut file = std::fs::File::create(dir.join("app.jsonl")).unwrap();
    for i in 0..6 {
        writeln!(
            file,
            "{}",
            json!({
                "timestamp": format!("2024-01-15T10:00:{:02}", i),
                "service": "auth-service",
                "level": "INFO",
                "message": "login ok",
            })
        )
        .unwrap();
    }
    for i in 0..4 {
        writeln!(
            file,
            "{}",
            json!({
                "timestamp": format!("2024-01-15T10:01:{:02}", i),
                "service": "auth-service",
                "level": "ERROR",
                "message": "Database connection pool exhausted",
            })
        )
        .unwrap();
    }
    for i in 0..10 {
        writeln!(
            file,
            "{}",
            json!({
                "timestamp": format!("2024-01-15T10:02:{:02}", i),
                "service": "payment-service",
                "level": "INFO",
                "message": "charged",
            })
        )
        .unwrap();
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Registers a bare agent that forwards every message of `kinds` to a channel.
async fn observer(swarm: &IncidentResponseSwarm, kinds: &[MessageKind]) -> (Arc<Agent>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let agent = Agent::new(
        AgentDescriptor::new("observer", "test", Vec::<String>::new()),
        swarm.context().clone(),
        Arc::new(NoopBehavior),
    );
    for kind in kinds {
        let tx = tx.clone();
        agent.register_handler(kind.clone(), move |_state: Arc<AgentState>, message: Message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
                Ok::<Option<Message>, anyhow::Error>(None)
            }
        });
    }
    agent.register().unwrap();
    agent.start().await.unwrap();
    (agent, rx)
}

#[tokio::test]
async fn test_log_file_flows_to_incident_and_plan() {
    let dir = tempfile::tempdir().unwrap();
    write_incident_log(dir.path());

    let swarm = IncidentResponseSwarm::new(&config(dir.path())).unwrap();
    swarm.start().await.unwrap();
    swarm.ingest_logs_dir().await;

    eventually("remediation plan", || !swarm.remediator().plans().is_empty()).await;

    let snapshot = swarm.snapshot();
    assert_eq!(snapshot.incidents.len(), 1);
    let incident = &snapshot.incidents[0];
    assert_eq!(incident.affected_services, vec!["auth-service"]);
    assert_eq!(incident.severity, Severity::High);

    let plan = &snapshot.plans[&incident.id];
    assert_eq!(plan.incident_type, IncidentType::ServiceDown);
    assert_eq!(swarm.ingester().processed_files().len(), 1);

    swarm.stop().await;
}

#[tokio::test]
async fn test_agents_register_and_stop_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let swarm = IncidentResponseSwarm::new(&config(dir.path())).unwrap();

    let registry = swarm.context().registry().clone();
    assert_eq!(registry.find_agents_by_capability("incident_detection"), vec![ANALYZER_ID]);
    assert_eq!(registry.find_agents_by_type("perception"), vec![LOG_INGESTER_ID]);

    swarm.start().await.unwrap();
    for agent in swarm.snapshot().agents.values() {
        assert_eq!(agent.status, Liveness::Active);
    }
    assert_eq!(swarm.remediator().agent().status(), AgentStatus::Online);

    swarm.stop().await;
    assert_eq!(swarm.analyzer().agent().status(), AgentStatus::Offline);
    assert!(registry.get_agent_info(REMEDIATOR_ID).is_none());
    assert!(!swarm.context().bus().is_running());
}

#[tokio::test]
async fn test_ping_reaches_every_agent() {
    let dir = tempfile::tempdir().unwrap();
    let swarm = IncidentResponseSwarm::new(&config(dir.path())).unwrap();
    swarm.start().await.unwrap();
    let (observer, mut replies) = observer(&swarm, &[MessageKind::Pong]).await;

    for target in [LOG_INGESTER_ID, ANALYZER_ID, REMEDIATOR_ID] {
        let ping = observer.state().message(MessageKind::Ping, Default::default()).to(target);
        let correlation = ping.correlation_id().to_string();
        assert!(observer.send_message(ping).await);

        let pong = tokio::time::timeout(Duration::from_secs(2), replies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pong.source(), target);
        assert_eq!(pong.correlation_id(), correlation);
    }

    observer.stop().await.unwrap();
    swarm.stop().await;
}

#[tokio::test]
async fn test_remediation_request_over_bus() {
    let dir = tempfile::tempdir().unwrap();
    let swarm = IncidentResponseSwarm::new(&config(dir.path())).unwrap();
    swarm.start().await.unwrap();
    let (observer, mut replies) = observer(&swarm, &[MessageKind::AnalysisResult]).await;

    let request = observer
        .state()
        .message(
            MessageKind::RemediationRequest,
            into_payload(json!({ "request_type": "runbook", "runbook_type": "database_recovery" })),
        )
        .to(REMEDIATOR_ID);
    assert!(observer.send_message(request).await);

    let reply = tokio::time::timeout(Duration::from_secs(2), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.payload()["runbook"]["type"], json!("database_recovery"));
    assert_eq!(reply.payload()["runbook"]["steps"][0], json!("Assess database state"));

    observer.stop().await.unwrap();
    swarm.stop().await;
}

#[tokio::test]
async fn test_root_cause_request_over_bus() {
    let dir = tempfile::tempdir().unwrap();
    let swarm = IncidentResponseSwarm::new(&config(dir.path())).unwrap();
    swarm.start().await.unwrap();
    let (observer, mut replies) = observer(&swarm, &[MessageKind::AnalysisResult]).await;

    let request = observer
        .state()
        .message(
            MessageKind::RootCauseRequest,
            into_payload(json!({
                "incident": {
                    "id": "inc-manual",
                    "title": "Checkout failing",
                    "description": "SSL certificate expired on payment gateway",
                }
            })),
        )
        .to(ANALYZER_ID);
    assert!(observer.send_message(request).await);

    let reply = tokio::time::timeout(Duration::from_secs(2), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.payload()["incident_id"], json!("inc-manual"));
    assert_eq!(
        reply.payload()["root_cause_analysis"]["root_causes"][0]["cause"],
        json!("Expired or invalid TLS certificate")
    );

    observer.stop().await.unwrap();
    swarm.stop().await;
}

#[tokio::test]
async fn test_quiet_logs_open_no_incident() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = std::fs::File::create(dir.path().join("quiet.jsonl")).unwrap();
    for _ in 0..20 {
        writeln!(file, "{}", json!({ "service": "api", "level": "INFO", "message": "ok" })).unwrap();
    }
    drop(file);

    let swarm = IncidentResponseSwarm::new(&config(dir.path())).unwrap();
    swarm.start().await.unwrap();
    eventually("log file processed", || swarm.ingester().buffered_count() == 20).await;
    assert!(swarm.wait_for_idle(Duration::from_secs(2)).await);

    let snapshot = swarm.snapshot();
    assert!(snapshot.incidents.is_empty());
    assert!(snapshot.plans.is_empty());
    assert!(snapshot.bus.message_stats.messages_delivered >= 1);

    swarm.stop().await;
}

/// Hypothesizer that takes a while and records that it finished.
struct Sluggish {
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl Hypothesizer for Sluggish {
    async fn analyze(&self, incident: &Incident, evidence: &[String]) -> anyhow::Result<RootCauseAnalysis> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let analysis = KeywordHypothesizer.analyze(incident, evidence).await;
        self.finished.store(true, Ordering::SeqCst);
        analysis
    }
}

#[tokio::test]
async fn test_wait_for_idle_waits_for_running_handler() {
    let dir = tempfile::tempdir().unwrap();
    let finished = Arc::new(AtomicBool::new(false));
    let swarm = IncidentResponseSwarm::with_hypothesizer(
        &config(dir.path()),
        Arc::new(Sluggish {
            finished: finished.clone(),
        }),
    )
    .unwrap();
    swarm.start().await.unwrap();

    let request = Message::new(
        MessageKind::RootCauseRequest,
        into_payload(json!({ "incident": { "id": "inc-slow", "description": "database timeout" } })),
        "ops",
    )
    .to(ANALYZER_ID);
    assert!(swarm.context().bus().send_message(request).await);

    assert!(swarm.wait_for_idle(Duration::from_secs(5)).await);
    assert!(finished.load(Ordering::SeqCst));

    swarm.stop().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let mut no_heartbeat = config(dir.path());
    no_heartbeat.spec.agents.heartbeat_interval_secs = 0;
    assert!(IncidentResponseSwarm::new(&no_heartbeat).is_err());

    let mut no_scan = config(dir.path());
    no_scan.spec.detection.scan_interval_secs = 0;
    assert!(IncidentResponseSwarm::new(&no_scan).is_err());

    let mut no_sweep = config(dir.path());
    no_sweep.spec.registry.health_check_interval_secs = 0;
    assert!(IncidentResponseSwarm::new(&no_sweep).is_err());
}

#[tokio::test]
async fn test_incident_resolved_over_bus() {
    let dir = tempfile::tempdir().unwrap();
    write_incident_log(dir.path());

    let swarm = IncidentResponseSwarm::new(&config(dir.path())).unwrap();
    swarm.start().await.unwrap();
    swarm.ingest_logs_dir().await;
    eventually("incident", || !swarm.analyzer().incidents().is_empty()).await;
    let incident_id = swarm.analyzer().incidents()[0].id.clone();

    let (observer, mut replies) = observer(&swarm, &[MessageKind::AnalysisResult, MessageKind::Error]).await;
    let request = observer
        .state()
        .message(
            kinds::UPDATE_INCIDENT_STATUS,
            into_payload(json!({ "incident_id": incident_id, "reason": "pool resized" })),
        )
        .to(ANALYZER_ID);
    assert!(observer.send_message(request).await);

    let reply = tokio::time::timeout(Duration::from_secs(2), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.kind(), &MessageKind::AnalysisResult);
    assert_eq!(reply.payload()["status"], json!("resolved"));
    assert_eq!(
        swarm.analyzer().get_incident(&incident_id).unwrap().status,
        IncidentStatus::Resolved
    );

    let again = observer
        .state()
        .message(kinds::UPDATE_INCIDENT_STATUS, into_payload(json!({ "incident_id": incident_id })))
        .to(ANALYZER_ID);
    assert!(observer.send_message(again).await);
    let error = tokio::time::timeout(Duration::from_secs(2), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error.kind(), &MessageKind::Error);

    observer.stop().await.unwrap();
    swarm.stop().await;
}
