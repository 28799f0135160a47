// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Log Entries and Summaries
//!
//! Structured application log lines (one JSON object per line in `.jsonl`
//! files), the per-batch summary the ingester computes, and the simple
//! anomaly rules applied to each batch.
//!
//! | Anomaly | Rule | Severity |
//! |---------|------|----------|
//! | `error_spike` | errors > 10 % of the batch | high above 20 %, else medium |
//! | `repeated_error` | same error message > 5 times | medium |
//! | `service_degradation` | a service's errors > 20 % of its lines | high |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use nexus_core::Payload;

use crate::domain::incident::Severity;

/// Most recent entries carried in a `log_analysis` event.
pub const REPORT_ENTRY_LIMIT: usize = 100;

/// One application log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default = "unknown_service")]
    pub service: String,
    #[serde(default = "unknown_level")]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub metadata: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

fn unknown_service() -> String {
    "unknown".to_string()
}

fn unknown_level() -> String {
    "UNKNOWN".to_string()
}

impl LogEntry {
    pub fn new(service: impl Into<String>, level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            service: service.into(),
            level: level.into(),
            message: message.into(),
            metadata: Payload::new(),
            trace_id: None,
        }
    }

    pub fn at(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// `ERROR` and `FATAL` lines count as errors.
    pub fn is_error(&self) -> bool {
        self.level == "ERROR" || self.level == "FATAL"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ErrorSpike,
    RepeatedError,
    ServiceDegradation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub description: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_service: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSample {
    pub timestamp: Option<String>,
    pub service: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Payload,
}

/// Statistics for one batch of log entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSummary {
    pub total_logs: usize,
    pub error_rate: f64,
    pub level_distribution: BTreeMap<String, usize>,
    pub service_distribution: BTreeMap<String, usize>,
    pub time_range: TimeRange,
    /// Last 10 error lines
    pub recent_errors: Vec<ErrorSample>,
    pub anomalies_detected: Vec<Anomaly>,
}

impl LogSummary {
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        if entries.is_empty() {
            return Self::default();
        }

        let mut level_distribution = BTreeMap::new();
        let mut service_distribution = BTreeMap::new();
        let mut errors = Vec::new();
        for entry in entries {
            *level_distribution.entry(entry.level.clone()).or_insert(0) += 1;
            *service_distribution.entry(entry.service.clone()).or_insert(0) += 1;
            if entry.is_error() {
                errors.push(ErrorSample {
                    timestamp: entry.timestamp.clone(),
                    service: entry.service.clone(),
                    message: entry.message.clone(),
                    metadata: entry.metadata.clone(),
                });
            }
        }

        let timestamps = entries.iter().filter_map(|e| e.timestamp.as_ref());
        let time_range = TimeRange {
            start: timestamps.clone().min().cloned(),
            end: timestamps.max().cloned(),
        };

        let skip = errors.len().saturating_sub(10);
        Self {
            total_logs: entries.len(),
            error_rate: errors.len() as f64 / entries.len() as f64,
            level_distribution,
            service_distribution,
            time_range,
            recent_errors: errors.into_iter().skip(skip).collect(),
            anomalies_detected: detect_anomalies(entries),
        }
    }
}

/// Apply the batch anomaly rules. Results are ordered by rule, then by
/// message or service name.
pub fn detect_anomalies(entries: &[LogEntry]) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let total = entries.len() as f64;
    let errors: Vec<&LogEntry> = entries.iter().filter(|e| e.is_error()).collect();
    let error_count = errors.len() as f64;

    if error_count > total * 0.1 {
        anomalies.push(Anomaly {
            kind: AnomalyKind::ErrorSpike,
            description: format!(
                "High error rate detected: {}/{} logs",
                errors.len(),
                entries.len()
            ),
            severity: if error_count > total * 0.2 {
                Severity::High
            } else {
                Severity::Medium
            },
            affected_service: None,
        });
    }

    let mut by_message: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_service: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in &errors {
        *by_message.entry(entry.message.as_str()).or_insert(0) += 1;
        *by_service.entry(entry.service.as_str()).or_insert(0) += 1;
    }

    for (message, count) in by_message {
        if count > 5 {
            let excerpt: String = message.chars().take(50).collect();
            anomalies.push(Anomaly {
                kind: AnomalyKind::RepeatedError,
                description: format!("Repeated error: \"{}...\" ({} times)", excerpt, count),
                severity: Severity::Medium,
                affected_service: None,
            });
        }
    }

    for (service, count) in by_service {
        let service_total = entries.iter().filter(|e| e.service == service).count();
        if service_total > 0 && count as f64 / service_total as f64 > 0.2 {
            anomalies.push(Anomaly {
                kind: AnomalyKind::ServiceDegradation,
                description: format!(
                    "Service {} showing high error rate: {}/{}",
                    service, count, service_total
                ),
                severity: Severity::High,
                affected_service: Some(service.to_string()),
            });
        }
    }

    anomalies
}

/// Body of a `log_analysis` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogAnalysisReport {
    /// Up to the last [`REPORT_ENTRY_LIMIT`] entries of the batch
    #[serde(default)]
    pub log_entries: Vec<LogEntry>,
    #[serde(default)]
    pub anomalies: Vec<Anomaly>,
    #[serde(default)]
    pub summary: LogSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default)]
    pub processed_count: usize,
}

impl LogAnalysisReport {
    pub fn from_entries(entries: &[LogEntry], source_file: Option<String>) -> Self {
        let summary = LogSummary::from_entries(entries);
        let skip = entries.len().saturating_sub(REPORT_ENTRY_LIMIT);
        Self {
            log_entries: entries[skip..].to_vec(),
            anomalies: summary.anomalies_detected.clone(),
            summary,
            source_file,
            processed_count: entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(service: &str, ok: usize, errors: usize, message: &str) -> Vec<LogEntry> {
        let mut entries: Vec<LogEntry> = (0..ok)
            .map(|i| LogEntry::new(service, "INFO", "ok").at(format!("2024-01-15T10:00:{:02}", i % 60)))
            .collect();
        entries.extend((0..errors).map(|_| LogEntry::new(service, "ERROR", message)));
        entries
    }

    #[test]
    fn test_summary_counts() {
        let mut entries = batch("auth-service", 8, 2, "db down");
        entries.push(LogEntry::new("payment-service", "FATAL", "crash"));

        let summary = LogSummary::from_entries(&entries);
        assert_eq!(summary.total_logs, 11);
        assert!((summary.error_rate - 3.0 / 11.0).abs() < 1e-9);
        assert_eq!(summary.level_distribution.get("ERROR"), Some(&2));
        assert_eq!(summary.level_distribution.get("FATAL"), Some(&1));
        assert_eq!(summary.service_distribution.get("auth-service"), Some(&10));
        assert_eq!(summary.recent_errors.len(), 3);
        assert_eq!(summary.time_range.start.as_deref(), Some("2024-01-15T10:00:00"));
        assert_eq!(summary.time_range.end.as_deref(), Some("2024-01-15T10:00:07"));
    }

    #[test]
    fn test_recent_errors_keep_last_ten() {
        let entries: Vec<LogEntry> = (0..15)
            .map(|i| LogEntry::new("svc", "ERROR", format!("e{}", i)))
            .collect();
        let summary = LogSummary::from_entries(&entries);
        assert_eq!(summary.recent_errors.len(), 10);
        assert_eq!(summary.recent_errors[0].message, "e5");
    }

    #[test]
    fn test_quiet_batch_has_no_anomalies() {
        let entries = batch("svc", 95, 5, "blip");
        assert!(detect_anomalies(&entries).is_empty());
    }

    #[test]
    fn test_error_spike_and_degradation() {
        let entries = batch("auth-service", 6, 4, "Database connection pool exhausted");
        let anomalies = detect_anomalies(&entries);

        let kinds: Vec<AnomalyKind> = anomalies.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AnomalyKind::ErrorSpike, AnomalyKind::ServiceDegradation]);
        assert_eq!(anomalies[0].severity, Severity::High);
        assert_eq!(anomalies[1].affected_service.as_deref(), Some("auth-service"));
    }

    #[test]
    fn test_repeated_error_detection() {
        let entries = batch("svc", 4, 6, "Connection refused");
        let repeated: Vec<Anomaly> = detect_anomalies(&entries)
            .into_iter()
            .filter(|a| a.kind == AnomalyKind::RepeatedError)
            .collect();
        assert_eq!(repeated.len(), 1);
        assert!(repeated[0].description.contains("(6 times)"));
    }

    #[test]
    fn test_report_truncates_entries() {
        let entries = batch("svc", 150, 0, "");
        let report = LogAnalysisReport::from_entries(&entries, Some("app.jsonl".into()));
        assert_eq!(report.log_entries.len(), REPORT_ENTRY_LIMIT);
        assert_eq!(report.processed_count, 150);
        assert_eq!(report.log_entries.last(), entries.last());
    }

    #[test]
    fn test_lenient_entry_decoding() {
        let entry: LogEntry = serde_json::from_str(r#"{"message": "hello"}"#).unwrap();
        assert_eq!(entry.service, "unknown");
        assert_eq!(entry.level, "UNKNOWN");
        assert!(!entry.is_error());
    }
}
