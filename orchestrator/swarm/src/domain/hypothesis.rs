// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Root Cause Hypotheses
//!
//! Domain interface for whatever produces root-cause hypotheses for an
//! incident, plus the keyword matcher used when no model-backed provider is
//! configured.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Anti-corruption port between the analyzer and hypothesis sources

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::incident::Incident;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    pub cause: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootCauseAnalysis {
    pub root_causes: Vec<RootCause>,
    pub analysis_steps: Vec<String>,
    pub contributing_factors: Vec<String>,
    pub confidence: f64,
}

impl RootCauseAnalysis {
    /// Answer when nothing more specific can be said.
    pub fn fallback() -> Self {
        Self {
            root_causes: vec![RootCause {
                cause: "Service degradation detected".to_string(),
                confidence: 0.5,
            }],
            analysis_steps: vec![
                "Basic pattern analysis performed".to_string(),
                "Service metrics reviewed".to_string(),
            ],
            contributing_factors: vec!["Unknown factors".to_string()],
            confidence: 0.4,
        }
    }
}

/// Produces root-cause hypotheses for an incident from supporting evidence
/// lines.
#[async_trait]
pub trait Hypothesizer: Send + Sync {
    async fn analyze(&self, incident: &Incident, evidence: &[String]) -> anyhow::Result<RootCauseAnalysis>;
}

/// (keywords, cause, confidence). First matching rule per keyword group wins.
const KEYWORD_RULES: &[(&[&str], &str, f64)] = &[
    (&["database", "connection pool", "sql"], "Database connection timeout", 0.8),
    (&["out of memory", "memory", "oom"], "Memory exhaustion in service", 0.7),
    (&["timeout", "timed out", "latency"], "Upstream dependency timeout", 0.65),
    (&["ssl", "certificate"], "Expired or invalid TLS certificate", 0.75),
    (&["authentication", "auth"], "Authentication provider failure", 0.6),
    (&["cpu", "load"], "CPU saturation", 0.6),
    (&["connection refused", "unavailable"], "Downstream service unreachable", 0.6),
];

/// Matches the incident text and evidence against a fixed keyword table.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordHypothesizer;

impl KeywordHypothesizer {
    pub fn hypothesize(&self, incident: &Incident, evidence: &[String]) -> RootCauseAnalysis {
        let mut haystack = incident.search_text();
        for line in evidence {
            haystack.push(' ');
            haystack.push_str(&line.to_lowercase());
        }

        let root_causes: Vec<RootCause> = KEYWORD_RULES
            .iter()
            .filter(|(keywords, _, _)| keywords.iter().any(|k| haystack.contains(k)))
            .map(|(_, cause, confidence)| RootCause {
                cause: cause.to_string(),
                confidence: *confidence,
            })
            .collect();

        if root_causes.is_empty() {
            return RootCauseAnalysis::fallback();
        }

        let confidence = root_causes
            .iter()
            .map(|c| c.confidence)
            .fold(0.0_f64, f64::max);
        let mut contributing_factors = Vec::new();
        if incident.error_rate >= 0.5 {
            contributing_factors.push("Majority of requests failing".to_string());
        }
        if incident.affected_services.len() > 1 {
            contributing_factors.push("Multiple services affected".to_string());
        }

        RootCauseAnalysis {
            root_causes,
            analysis_steps: vec![
                "Reviewed error patterns in logs".to_string(),
                format!("Matched {} evidence lines against known failure signatures", evidence.len()),
            ],
            contributing_factors,
            confidence,
        }
    }
}

#[async_trait]
impl Hypothesizer for KeywordHypothesizer {
    async fn analyze(&self, incident: &Incident, evidence: &[String]) -> anyhow::Result<RootCauseAnalysis> {
        Ok(self.hypothesize(incident, evidence))
    }
}
