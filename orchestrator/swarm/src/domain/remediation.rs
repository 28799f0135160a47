// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Remediation Templates and Plans
//!
//! Keyword classification of incidents and the static template library the
//! remediator renders plans, runbooks and shell scripts from.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure plan generation; no I/O

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::incident::{Incident, Severity};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    HighCpu,
    MemoryExhaustion,
    DiskSpace,
    ServiceDown,
    NetworkLatency,
    DatabaseConnection,
    #[default]
    General,
}

/// Checked in order; the first group with a matching keyword decides.
const CLASSIFICATION: &[(IncidentType, &[&str])] = &[
    (IncidentType::HighCpu, &["cpu", "processor", "load"]),
    (IncidentType::MemoryExhaustion, &["memory", "ram", "oom"]),
    (IncidentType::DiskSpace, &["disk", "storage", "space"]),
    (IncidentType::ServiceDown, &["service", "down", "unavailable"]),
    (IncidentType::NetworkLatency, &["network", "latency", "timeout"]),
    (IncidentType::DatabaseConnection, &["database", "connection", "sql"]),
];

impl IncidentType {
    pub fn classify(incident: &Incident) -> Self {
        let text = if incident.description.is_empty() {
            incident.title.to_lowercase()
        } else {
            incident.description.to_lowercase()
        };
        Self::classify_text(&text)
    }

    pub fn classify_text(text: &str) -> Self {
        let text = text.to_lowercase();
        CLASSIFICATION
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
            .map(|(kind, _)| *kind)
            .unwrap_or(IncidentType::General)
    }

    /// Parse a wire name; unknown names map to `General`.
    pub fn from_name(name: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(name.to_string())).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::HighCpu => "high_cpu",
            IncidentType::MemoryExhaustion => "memory_exhaustion",
            IncidentType::DiskSpace => "disk_space",
            IncidentType::ServiceDown => "service_down",
            IncidentType::NetworkLatency => "network_latency",
            IncidentType::DatabaseConnection => "database_connection",
            IncidentType::General => "general",
        }
    }

    pub fn template(&self) -> Option<&'static RemediationTemplate> {
        TEMPLATES.iter().find(|t| t.kind == *self)
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RemediationTemplate {
    pub kind: IncidentType,
    pub priority: Severity,
    pub steps: &'static [&'static str],
    /// (script name, command template)
    pub scripts: &'static [(&'static str, &'static str)],
}

impl RemediationTemplate {
    pub fn script(&self, name: &str) -> Option<&'static str> {
        self.scripts.iter().find(|(n, _)| *n == name).map(|(_, s)| *s)
    }
}

static TEMPLATES: &[RemediationTemplate] = &[
    RemediationTemplate {
        kind: IncidentType::HighCpu,
        priority: Severity::High,
        steps: &[
            "Identify processes consuming high CPU",
            "Check for runaway processes or memory leaks",
            "Scale horizontally if needed",
            "Restart affected services if safe",
            "Monitor recovery progress",
        ],
        scripts: &[
            ("diagnosis", "top -n 1 | head -20; ps aux --sort=-%cpu | head -10"),
            ("mitigation", "systemctl restart {service_name}"),
            ("scaling", "kubectl scale deployment {deployment} --replicas={replicas}"),
        ],
    },
    RemediationTemplate {
        kind: IncidentType::MemoryExhaustion,
        priority: Severity::Critical,
        steps: &[
            "Identify memory-consuming processes",
            "Check for memory leaks",
            "Free up memory by restarting services",
            "Scale up memory allocation",
            "Implement memory monitoring",
        ],
        scripts: &[
            ("diagnosis", "free -h; ps aux --sort=-%mem | head -10"),
            ("mitigation", "systemctl restart {service_name}"),
            ("cleanup", "echo 3 > /proc/sys/vm/drop_caches"),
        ],
    },
    RemediationTemplate {
        kind: IncidentType::DiskSpace,
        priority: Severity::High,
        steps: &[
            "Identify large files and directories",
            "Clean up temporary files",
            "Archive old logs",
            "Expand disk space if needed",
            "Set up log rotation",
        ],
        scripts: &[
            ("diagnosis", "df -h; du -sh /* | sort -hr | head -10"),
            ("cleanup", "find /tmp -type f -atime +7 -delete"),
            ("log_cleanup", "journalctl --vacuum-time=7d"),
        ],
    },
    RemediationTemplate {
        kind: IncidentType::ServiceDown,
        priority: Severity::Critical,
        steps: &[
            "Check service status",
            "Review recent logs for errors",
            "Attempt service restart",
            "Verify dependencies are running",
            "Escalate if restart fails",
        ],
        scripts: &[
            (
                "diagnosis",
                "systemctl status {service_name}; journalctl -u {service_name} --since '10 minutes ago'",
            ),
            ("mitigation", "systemctl restart {service_name}"),
            ("verification", "systemctl is-active {service_name}"),
        ],
    },
    RemediationTemplate {
        kind: IncidentType::NetworkLatency,
        priority: Severity::Medium,
        steps: &[
            "Check network connectivity",
            "Test latency to key endpoints",
            "Review network configuration",
            "Check for network congestion",
            "Contact network team if needed",
        ],
        scripts: &[
            ("diagnosis", "ping -c 5 {endpoint}; traceroute {endpoint}"),
            ("bandwidth_test", "iperf3 -c {server} -t 10"),
            ("dns_check", "nslookup {domain}"),
        ],
    },
    RemediationTemplate {
        kind: IncidentType::DatabaseConnection,
        priority: Severity::Critical,
        steps: &[
            "Check database service status",
            "Verify connection pool settings",
            "Test database connectivity",
            "Review database logs",
            "Restart connection pools if needed",
        ],
        scripts: &[
            ("diagnosis", "systemctl status postgresql; netstat -an | grep 5432"),
            ("connection_test", "psql -h {host} -U {user} -c 'SELECT 1;'"),
            ("pool_restart", "systemctl restart pgbouncer"),
        ],
    },
];

/// Expected time to resolve, by severity then type.
pub fn estimate_resolution_time(severity: Severity, kind: IncidentType) -> &'static str {
    match (severity, kind) {
        (Severity::Critical, IncidentType::ServiceDown) => "15-30 minutes",
        (Severity::Critical, IncidentType::MemoryExhaustion) => "10-20 minutes",
        (Severity::Critical, IncidentType::DatabaseConnection) => "20-45 minutes",
        (Severity::Critical, _) => "30-60 minutes",
        (Severity::High, IncidentType::HighCpu) => "20-40 minutes",
        (Severity::High, IncidentType::DiskSpace) => "15-30 minutes",
        (Severity::High, _) => "45-90 minutes",
        (Severity::Medium, IncidentType::NetworkLatency) => "30-60 minutes",
        (Severity::Medium, _) => "1-2 hours",
        (Severity::Low, _) => "2-4 hours",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_number: usize,
    pub description: String,
    pub estimated_time: String,
    pub commands: Vec<String>,
    pub verification: String,
    pub rollback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub triggers: Vec<String>,
    pub steps: Vec<String>,
    pub time_limit: String,
    pub escalation_contacts: Vec<String>,
}

impl Default for RollbackPlan {
    fn default() -> Self {
        Self {
            triggers: strings(&[
                "Resolution attempts fail after 3 tries",
                "System state worsens",
                "New critical issues arise",
            ]),
            steps: strings(&[
                "Stop current remediation actions",
                "Restore previous configuration",
                "Verify system stability",
                "Escalate to senior team",
            ]),
            time_limit: "30 minutes".to_string(),
            escalation_contacts: strings(&[
                "senior-ops-team@company.com",
                "infrastructure-lead@company.com",
            ]),
        }
    }
}

const VERIFICATION_STEPS: &[&str] = &[
    "Check service health endpoints",
    "Verify metrics have returned to normal",
    "Test affected functionality manually",
    "Confirm no new alerts are firing",
    "Monitor for 15 minutes to ensure stability",
];

const MONITORING_RECOMMENDATIONS: &[&str] = &[
    "Add alerting for early detection of similar issues",
    "Implement health checks for affected services",
    "Set up automated recovery for common scenarios",
    "Create dashboard for key metrics",
    "Schedule regular system health reviews",
];

/// Full plan for one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub incident_id: String,
    pub incident_type: IncidentType,
    pub priority: Severity,
    pub estimated_resolution_time: String,
    pub immediate_actions: Vec<String>,
    pub detailed_steps: Vec<PlanStep>,
    pub automation_scripts: BTreeMap<String, String>,
    pub rollback_plan: RollbackPlan,
    pub verification_steps: Vec<String>,
    pub monitoring_recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl RemediationPlan {
    pub fn for_incident(incident: &Incident, now: DateTime<Utc>) -> Self {
        let kind = IncidentType::classify(incident);
        let template = kind.template();

        let mut immediate_actions = Vec::new();
        if incident.severity == Severity::Critical {
            immediate_actions.push("Page on-call team immediately".to_string());
            immediate_actions.push("Start incident war room/bridge".to_string());
        }
        immediate_actions.push("Acknowledge incident in monitoring system".to_string());
        immediate_actions.push("Begin impact assessment".to_string());

        let mut detailed_steps = Vec::new();
        let mut automation_scripts = BTreeMap::new();
        if let Some(template) = template {
            immediate_actions.extend(template.steps.iter().take(2).map(|s| s.to_string()));
            detailed_steps = template
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| detail_step(i + 1, step, template))
                .collect();
            let params = ScriptParams::for_incident(incident);
            automation_scripts = template
                .scripts
                .iter()
                .map(|(name, script)| (name.to_string(), params.render(script)))
                .collect();
        }

        Self {
            incident_id: incident.id.clone(),
            incident_type: kind,
            priority: template.map(|t| t.priority).unwrap_or(Severity::Medium),
            estimated_resolution_time: estimate_resolution_time(incident.severity, kind).to_string(),
            immediate_actions,
            detailed_steps,
            automation_scripts,
            rollback_plan: RollbackPlan::default(),
            verification_steps: strings(VERIFICATION_STEPS),
            monitoring_recommendations: strings(MONITORING_RECOMMENDATIONS),
            generated_at: now,
        }
    }
}

fn detail_step(number: usize, step: &str, template: &RemediationTemplate) -> PlanStep {
    let lower = step.to_lowercase();
    let script = |name: &str| template.script(name).unwrap_or_default();

    let commands: Vec<String> = if lower.contains("identify") || lower.contains("check") {
        script("diagnosis").split("; ").map(str::to_string).collect()
    } else if lower.contains("restart") {
        vec![script("mitigation").to_string()]
    } else if lower.contains("scale") {
        vec![script("scaling").to_string()]
    } else if lower.contains("clean") {
        vec![script("cleanup").to_string()]
    } else {
        Vec::new()
    };

    let (verification, rollback) = if lower.contains("restart") {
        ("systemctl is-active {service_name}", "Restart can be reversed by stopping service")
    } else if lower.contains("scale") {
        ("kubectl get pods | grep {deployment}", "Scale back to original replica count")
    } else if lower.contains("clean") {
        ("df -h", "Restore from backup if files were critical")
    } else {
        ("echo 'Manual verification required'", "Document changes for potential rollback")
    };

    PlanStep {
        step_number: number,
        description: step.to_string(),
        estimated_time: "5-10 minutes".to_string(),
        commands: commands
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        verification: verification.to_string(),
        rollback: rollback.to_string(),
    }
}

const KNOWN_SERVICES: &[&str] = &["nginx", "apache", "mysql", "postgresql", "redis", "docker"];

/// Values substituted into script templates.
struct ScriptParams {
    service_name: String,
    target: String,
}

impl ScriptParams {
    fn for_incident(incident: &Incident) -> Self {
        let service_name = incident
            .affected_services
            .first()
            .cloned()
            .or_else(|| {
                incident
                    .description
                    .to_lowercase()
                    .split_whitespace()
                    .find(|w| KNOWN_SERVICES.contains(w))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown-service".to_string());
        let target = incident
            .affected_services
            .first()
            .cloned()
            .unwrap_or_else(|| "localhost".to_string());
        Self { service_name, target }
    }

    fn render(&self, script: &str) -> String {
        script
            .replace("{service_name}", &self.service_name)
            .replace("{deployment}", &self.service_name)
            .replace("{replicas}", "3")
            .replace("{endpoint}", &self.target)
            .replace("{host}", &self.target)
            .replace("{domain}", &self.target)
            .replace("{user}", "app_user")
            .replace("{server}", "localhost")
    }
}

/// Plan for a bare incident type, without a concrete incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickPlan {
    pub incident_type: IncidentType,
    pub priority: Severity,
    pub steps: Vec<String>,
    pub scripts: BTreeMap<String, String>,
    pub estimated_time: String,
    pub generated_at: DateTime<Utc>,
}

impl QuickPlan {
    pub fn for_type(kind: IncidentType, now: DateTime<Utc>) -> Self {
        let template = kind.template();
        Self {
            incident_type: kind,
            priority: template.map(|t| t.priority).unwrap_or(Severity::Medium),
            steps: template
                .map(|t| strings(t.steps))
                .unwrap_or_else(|| vec!["Manual investigation required".to_string()]),
            scripts: template
                .map(|t| {
                    t.scripts
                        .iter()
                        .map(|(n, s)| (n.to_string(), s.to_string()))
                        .collect::<BTreeMap<_, _>>()
                })
                .unwrap_or_default(),
            estimated_time: "30-60 minutes".to_string(),
            generated_at: now,
        }
    }
}

pub const DEFAULT_RUNBOOK: &str = "incident_response_checklist";

const RUNBOOKS: &[(&str, &[&str])] = &[
    (
        "incident_response_checklist",
        &[
            "Acknowledge incident and start timer",
            "Assemble incident response team",
            "Establish communication channels",
            "Begin initial assessment",
            "Implement immediate mitigation",
            "Document all actions taken",
            "Communicate status to stakeholders",
            "Conduct post-incident review",
        ],
    ),
    (
        "service_restart_procedure",
        &[
            "Check service dependencies",
            "Drain traffic if load balanced",
            "Stop service gracefully",
            "Wait for complete shutdown",
            "Start service",
            "Verify service health",
            "Restore traffic routing",
            "Monitor for stability",
        ],
    ),
    (
        "database_recovery",
        &[
            "Assess database state",
            "Check for corruption",
            "Stop application connections",
            "Create backup if possible",
            "Restore from last known good backup",
            "Replay transaction logs",
            "Verify data integrity",
            "Restore application connections",
        ],
    ),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runbook {
    #[serde(rename = "type")]
    pub kind: String,
    /// Empty for unknown runbook names
    pub steps: Vec<String>,
    pub estimated_time: String,
    pub prerequisites: Vec<String>,
    pub tools_required: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl Runbook {
    pub fn named(name: &str, now: DateTime<Utc>) -> Self {
        let steps = RUNBOOKS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, steps)| strings(steps))
            .unwrap_or_default();
        Self {
            kind: name.to_string(),
            steps,
            estimated_time: "45 minutes".to_string(),
            prerequisites: strings(&[
                "Access to monitoring systems",
                "Administrative privileges",
                "Incident response training",
            ]),
            tools_required: strings(&["SSH access", "Monitoring dashboard", "Communication platform"]),
            generated_at: now,
        }
    }

    pub fn available() -> impl Iterator<Item = &'static str> {
        RUNBOOKS.iter().map(|(name, _)| *name)
    }
}

/// Standalone bash scripts for an incident type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptBundle {
    pub diagnosis_script: String,
    pub mitigation_script: String,
    pub verification_script: String,
    pub rollback_script: String,
}

impl ScriptBundle {
    pub fn for_type(kind: IncidentType, now: DateTime<Utc>) -> Self {
        let template = kind.template();
        let body = |name: &str, fallback: &str| {
            template
                .and_then(|t| t.script(name))
                .unwrap_or(fallback)
                .to_string()
        };
        let stamp = now.to_rfc3339();

        Self {
            diagnosis_script: bash_script(
                "Diagnostic",
                &stamp,
                "Starting diagnostic checks...",
                &body("diagnosis", "echo \"No diagnosis script available\""),
                "Diagnostic checks complete.",
            ),
            mitigation_script: bash_script(
                "Mitigation",
                &stamp,
                "Starting mitigation actions...",
                &body("mitigation", "echo \"No mitigation script available\""),
                "Mitigation actions complete.",
            ),
            verification_script: bash_script(
                "Verification",
                &stamp,
                "Starting verification checks...",
                &body("verification", "echo \"Manual verification required\""),
                "Verification complete.",
            ),
            rollback_script: bash_script(
                "Rollback",
                &stamp,
                "Starting rollback procedures...",
                concat!(
                    "echo \"WARNING: This will undo recent changes\"\n",
                    "read -p \"Are you sure you want to proceed? (y/N): \" -n 1 -r\n",
                    "echo\n",
                    "if [[ $REPLY =~ ^[Yy]$ ]]; then\n",
                    "    echo \"Executing rollback...\"\n",
                    "    echo \"Rollback complete.\"\n",
                    "else\n",
                    "    echo \"Rollback cancelled.\"\n",
                    "fi",
                ),
                "",
            ),
        }
    }
}

fn bash_script(title: &str, stamp: &str, opening: &str, body: &str, closing: &str) -> String {
    let mut script = format!(
        "#!/bin/bash\n# {} script generated by NEXUS remediation agent\n# Generated at: {}\n\necho \"{}\"\n{}\n",
        title, stamp, opening, body
    );
    if !closing.is_empty() {
        script.push_str(&format!("echo \"{}\"\n", closing));
    }
    script
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
