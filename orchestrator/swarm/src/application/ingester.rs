// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Log Ingester - Perception agent
//!
//! Reads JSON-lines log files, keeps a bounded buffer of recent entries and
//! publishes a `log_analysis` event for every non-empty batch. Its background
//! task scans the configured log directory for new `.jsonl` files.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Turn raw log files into `log_analysis` events

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nexus_core::domain::node_config::DetectionConfig;
use nexus_core::{
    into_payload, Agent, AgentBehavior, AgentDescriptor, AgentState, Message, MessageHandler,
    MessageKind, MessagingContext,
};

use crate::application::{encode, field};
use crate::domain::kinds;
use crate::domain::logs::{LogAnalysisReport, LogEntry, LogSummary};

pub const LOG_INGESTER_ID: &str = "log-ingester-001";

/// Most recent entries retained for `get_recent_logs`.
pub const BUFFER_LIMIT: usize = 1000;

const DEFAULT_RECENT_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to read log file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

struct IngesterCore {
    logs_dir: PathBuf,
    scan_interval: Duration,
    buffer: Mutex<VecDeque<LogEntry>>,
    processed_files: Mutex<HashSet<PathBuf>>,
    scan_lock: tokio::sync::Mutex<()>,
}

impl IngesterCore {
    fn buffer_entries(&self, entries: &[LogEntry]) {
        let mut buffer = self.buffer.lock();
        buffer.extend(entries.iter().cloned());
        while buffer.len() > BUFFER_LIMIT {
            buffer.pop_front();
        }
    }

    async fn process_file(&self, state: &AgentState, path: &Path) -> Result<LogAnalysisReport, IngestError> {
        info!(agent_id = %state.id(), path = %path.display(), "Processing log file");

        let raw = tokio::fs::read_to_string(path).await.map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut entries = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping malformed log line"
                ),
            }
        }

        self.processed_files.lock().insert(path.to_path_buf());
        let source_file = path.file_name().map(|n| n.to_string_lossy().into_owned());

        if entries.is_empty() {
            debug!(path = %path.display(), "Log file contained no entries");
            return Ok(LogAnalysisReport {
                source_file,
                ..LogAnalysisReport::default()
            });
        }

        self.buffer_entries(&entries);
        let report = LogAnalysisReport::from_entries(&entries, source_file);
        info!(
            agent_id = %state.id(),
            entries = report.processed_count,
            anomalies = report.anomalies.len(),
            "Processed log file"
        );
        metrics::counter!("nexus_log_entries_ingested_total").increment(entries.len() as u64);

        match encode(&report) {
            Ok(payload) => {
                if !state.publish(MessageKind::LogAnalysis, payload).await {
                    warn!(agent_id = %state.id(), "log_analysis event was not fully delivered");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode log analysis report"),
        }
        Ok(report)
    }

    /// Process every `.jsonl` file in the log directory not seen before, in
    /// file name order. Returns the number of files processed. Scans never
    /// overlap.
    async fn scan(&self, state: &AgentState) -> usize {
        let _guard = self.scan_lock.lock().await;
        let mut dir = match tokio::fs::read_dir(&self.logs_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                debug!(logs_dir = %self.logs_dir.display(), error = %e, "Log directory not readable");
                return 0;
            }
        };

        let mut pending = Vec::new();
        loop {
            match dir.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    let is_jsonl = path.extension().is_some_and(|ext| ext == "jsonl");
                    if is_jsonl && !self.processed_files.lock().contains(&path) {
                        pending.push(path);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(logs_dir = %self.logs_dir.display(), error = %e, "Log directory scan interrupted");
                    break;
                }
            }
        }
        pending.sort();

        let mut processed = 0;
        for path in pending {
            match self.process_file(state, &path).await {
                Ok(_) => processed += 1,
                Err(e) => warn!(error = %e, "Failed to process log file"),
            }
        }
        processed
    }
}

struct ScanBehavior {
    core: Arc<IngesterCore>,
}

#[async_trait]
impl AgentBehavior for ScanBehavior {
    async fn run(&self, agent: Arc<AgentState>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(self.core.scan_interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let processed = self.core.scan(&agent).await;
                    if processed > 0 {
                        debug!(agent_id = %agent.id(), files = processed, "Log directory scan complete");
                    }
                }
            }
        }
        Ok(())
    }
}

/// `ingest_logs {logs: [...]}` → `logs_ingested {processed_count, summary, timestamp}`
struct IngestLogs {
    core: Arc<IngesterCore>,
}

#[async_trait]
impl MessageHandler for IngestLogs {
    async fn handle(&self, agent: Arc<AgentState>, message: Message) -> anyhow::Result<Option<Message>> {
        let entries: Vec<LogEntry> = field(&message, "logs")?.unwrap_or_default();
        self.core.buffer_entries(&entries);

        let payload = into_payload(json!({
            "processed_count": entries.len(),
            "summary": LogSummary::from_entries(&entries),
            "timestamp": Utc::now().to_rfc3339(),
        }));
        Ok(Some(message.reply(kinds::LOGS_INGESTED, payload, agent.id())))
    }
}

/// `get_recent_logs {limit?, service?, level?}` → newest first
struct RecentLogs {
    core: Arc<IngesterCore>,
}

#[async_trait]
impl MessageHandler for RecentLogs {
    async fn handle(&self, agent: Arc<AgentState>, message: Message) -> anyhow::Result<Option<Message>> {
        let limit: usize = field(&message, "limit")?.unwrap_or(DEFAULT_RECENT_LIMIT);
        let service: Option<String> = field(&message, "service")?;
        let level: Option<String> = field(&message, "level")?;

        let (mut logs, total_count) = {
            let buffer = self.core.buffer.lock();
            let logs: Vec<LogEntry> = buffer
                .iter()
                .filter(|e| service.as_ref().is_none_or(|s| &e.service == s))
                .filter(|e| level.as_ref().is_none_or(|l| &e.level == l))
                .cloned()
                .collect();
            (logs, buffer.len())
        };
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        logs.truncate(limit);

        let payload = into_payload(json!({
            "filtered_count": logs.len(),
            "logs": logs,
            "total_count": total_count,
        }));
        Ok(Some(message.reply(kinds::RECENT_LOGS_RESPONSE, payload, agent.id())))
    }
}

/// The perception agent.
pub struct LogIngester {
    agent: Arc<Agent>,
    core: Arc<IngesterCore>,
}

impl LogIngester {
    pub fn new(context: MessagingContext, detection: &DetectionConfig) -> Self {
        Self::with_settings(context, detection.logs_dir.clone(), detection.scan_interval())
    }

    pub fn with_settings(context: MessagingContext, logs_dir: PathBuf, scan_interval: Duration) -> Self {
        let core = Arc::new(IngesterCore {
            logs_dir,
            scan_interval,
            buffer: Mutex::new(VecDeque::new()),
            processed_files: Mutex::new(HashSet::new()),
            scan_lock: tokio::sync::Mutex::new(()),
        });
        let agent = Agent::new(
            AgentDescriptor::new(
                LOG_INGESTER_ID,
                "perception",
                ["log_ingestion", "log_parsing", "real_time_monitoring"],
            ),
            context,
            Arc::new(ScanBehavior { core: core.clone() }),
        );
        agent.register_handler(kinds::INGEST_LOGS, IngestLogs { core: core.clone() });
        agent.register_handler(kinds::GET_RECENT_LOGS, RecentLogs { core: core.clone() });

        Self { agent, core }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn logs_dir(&self) -> &Path {
        &self.core.logs_dir
    }

    /// Parse one file, buffer its entries and publish a `log_analysis` event
    /// when it holds any. Malformed lines are skipped.
    pub async fn process_log_file(&self, path: impl AsRef<Path>) -> Result<LogAnalysisReport, IngestError> {
        self.core.process_file(self.agent.state(), path.as_ref()).await
    }

    /// Process new `.jsonl` files in the log directory now.
    pub async fn scan_logs_dir(&self) -> usize {
        self.core.scan(self.agent.state()).await
    }

    pub fn buffered_count(&self) -> usize {
        self.core.buffer.lock().len()
    }

    pub fn processed_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.core.processed_files.lock().iter().cloned().collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    fn ingester(dir: &Path) -> LogIngester {
        LogIngester::with_settings(
            MessagingContext::default(),
            dir.to_path_buf(),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_process_file_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(
            dir.path(),
            "app.jsonl",
            &[
                r#"{"timestamp":"2024-01-15T10:00:00","service":"api","level":"INFO","message":"ok"}"#,
                "not json",
                "",
                r#"{"timestamp":"2024-01-15T10:00:01","service":"api","level":"ERROR","message":"boom"}"#,
            ],
        );

        let ingester = ingester(dir.path());
        let report = ingester.process_log_file(&path).await.unwrap();

        assert_eq!(report.processed_count, 2);
        assert_eq!(report.source_file.as_deref(), Some("app.jsonl"));
        assert!((report.summary.error_rate - 0.5).abs() < 1e-9);
        assert_eq!(ingester.buffered_count(), 2);
        assert_eq!(ingester.processed_files(), vec![path]);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ingester = ingester(dir.path());
        let result = ingester.process_log_file(dir.path().join("absent.jsonl")).await;
        assert!(matches!(result, Err(IngestError::Io { .. })));
    }

    #[tokio::test]
    async fn test_scan_only_picks_up_new_jsonl_files() {
        let dir = tempfile::tempdir().unwrap();
        let line = r#"{"service":"api","level":"INFO","message":"ok"}"#;
        write_log(dir.path(), "a.jsonl", &[line]);
        write_log(dir.path(), "notes.txt", &[line]);

        let ingester = ingester(dir.path());
        assert_eq!(ingester.scan_logs_dir().await, 1);
        assert_eq!(ingester.scan_logs_dir().await, 0);

        write_log(dir.path(), "b.jsonl", &[line, line]);
        assert_eq!(ingester.scan_logs_dir().await, 1);
        assert_eq!(ingester.buffered_count(), 3);
    }

    #[tokio::test]
    async fn test_missing_logs_dir_scans_nothing() {
        let ingester = LogIngester::with_settings(
            MessagingContext::default(),
            PathBuf::from("/nonexistent/nexus-logs"),
            Duration::from_secs(10),
        );
        assert_eq!(ingester.scan_logs_dir().await, 0);
    }

    #[tokio::test]
    async fn test_buffer_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let ingester = ingester(dir.path());
        let entries: Vec<LogEntry> = (0..1200)
            .map(|i| LogEntry::new("svc", "INFO", format!("m{}", i)))
            .collect();
        ingester.core.buffer_entries(&entries);

        assert_eq!(ingester.buffered_count(), BUFFER_LIMIT);
        assert_eq!(ingester.core.buffer.lock().front().unwrap().message, "m200");
    }

    #[tokio::test]
    async fn test_recent_logs_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let ingester = ingester(dir.path());
        ingester.core.buffer_entries(&[
            LogEntry::new("api", "ERROR", "first").at("2024-01-15T10:00:00"),
            LogEntry::new("db", "ERROR", "other").at("2024-01-15T10:00:01"),
            LogEntry::new("api", "INFO", "fine").at("2024-01-15T10:00:02"),
            LogEntry::new("api", "ERROR", "second").at("2024-01-15T10:00:03"),
        ]);

        let request = Message::new(
            kinds::GET_RECENT_LOGS,
            into_payload(json!({ "service": "api", "level": "ERROR", "limit": 5 })),
            "ops",
        )
        .to(LOG_INGESTER_ID);
        let reply = RecentLogs {
            core: ingester.core.clone(),
        }
        .handle(ingester.agent().state().clone(), request)
        .await
        .unwrap()
        .unwrap();

        assert_eq!(reply.kind(), &MessageKind::from(kinds::RECENT_LOGS_RESPONSE));
        assert_eq!(reply.payload()["total_count"], json!(4));
        assert_eq!(reply.payload()["filtered_count"], json!(2));
        assert_eq!(reply.payload()["logs"][0]["message"], json!("second"));
        assert_eq!(reply.payload()["logs"][1]["message"], json!("first"));
    }
}
