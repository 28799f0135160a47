// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a NEXUS node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Message bus sizing and history retention
// - Agent loop timing (heartbeat, mailbox poll, shutdown grace)
// - Registry liveness thresholds
// - Incident detection thresholds
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "nexus.dev/v1";
pub const CONFIG_KIND: &str = "NexusConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexusConfig {
    /// API version (must be "nexus.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NexusConfig")
    pub kind: String,

    /// Node metadata (name, labels)
    pub metadata: ManifestMetadata,

    /// Node configuration specification
    #[serde(default)]
    pub spec: NexusConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    /// Optional: Labels for categorization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Node configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NexusConfigSpec {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub agents: AgentConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// What the bus does with the mailbox copy after an inline handler ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InlineDeliveryPolicy {
    /// Leave the mailbox copy for independent polling (the same message may
    /// be seen twice: once inline, once by the poller).
    #[default]
    Retain,
    /// Remove the mailbox copy once the inline handler succeeded. A failed
    /// inline handler always leaves the copy in place.
    ConsumeOnSuccess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum pending messages per mailbox before the oldest is evicted
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Messages older than this are purged from history on each send
    #[serde(default = "default_history_ttl_minutes")]
    pub history_ttl_minutes: u64,

    /// Hard cap on retained history entries
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default)]
    pub inline_delivery: InlineDeliveryPolicy,
}

impl BusConfig {
    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_ttl_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Seconds between heartbeats sent to the registry
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Mailbox wait timeout; bounds how long a stop request goes unnoticed
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long stop() waits for loops to exit before aborting them
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl AgentConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Silence longer than this marks an agent inactive
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Period of the health sweep run by the orchestrator
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

impl RegistryConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Per-service error rate above which an incident is opened
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Directory scanned for `.jsonl` log files
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Seconds between log directory scans
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

impl DetectionConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format ("compact" or "json")
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Prometheus exporter port (disabled when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

// Default value functions
fn default_mailbox_capacity() -> usize {
    1000
}

fn default_history_ttl_minutes() -> u64 {
    60
}

fn default_history_limit() -> usize {
    10_000
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_error_rate_threshold() -> f64 {
    0.15
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("data/logs")
}

fn default_scan_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            history_ttl_minutes: default_history_ttl_minutes(),
            history_limit: default_history_limit(),
            inline_delivery: InlineDeliveryPolicy::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            health_check_interval_secs: default_health_check_interval(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: default_error_rate_threshold(),
            logs_dir: default_logs_dir(),
            scan_interval_secs: default_scan_interval(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: CONFIG_KIND.to_string(),
            metadata: ManifestMetadata {
                name: "nexus-node".to_string(),
                labels: None,
            },
            spec: NexusConfigSpec::default(),
        }
    }
}

impl NexusConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Candidate locations in discovery order (excluding the CLI flag).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var("NEXUS_CONFIG_PATH") {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./nexus-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".nexus").join("config.yaml"));
        }
        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/nexus/config.yaml"));
        #[cfg(windows)]
        paths.push(PathBuf::from("C:\\ProgramData\\Nexus\\config.yaml"));
        paths
    }

    /// Discover configuration file using precedence order
    /// 1. NEXUS_CONFIG_PATH environment variable
    /// 2. ./nexus-config.yaml (working directory)
    /// 3. ~/.nexus/config.yaml (user home)
    /// 4. /etc/nexus/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // 1. Explicit CLI path (Fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        // 2. Discovery (Env -> Cwd -> Home -> System)
        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NEXUS_MAILBOX_CAPACITY") {
            match val.parse::<usize>() {
                Ok(capacity) => {
                    tracing::info!("Environment override: NEXUS_MAILBOX_CAPACITY={}", capacity);
                    self.spec.bus.mailbox_capacity = capacity;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for NEXUS_MAILBOX_CAPACITY: '{}'. Expected a number. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("NEXUS_HEARTBEAT_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: NEXUS_HEARTBEAT_INTERVAL_SECS={}", secs);
                    self.spec.agents.heartbeat_interval_secs = secs;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for NEXUS_HEARTBEAT_INTERVAL_SECS: '{}'. Expected a number. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("NEXUS_LOG_LEVEL") {
            self.spec.observability.log_level = val;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != CONFIG_KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, CONFIG_KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        if spec.bus.mailbox_capacity == 0 {
            anyhow::bail!("spec.bus.mailbox_capacity must be greater than 0");
        }

        if spec.bus.history_ttl_minutes == 0 {
            anyhow::bail!("spec.bus.history_ttl_minutes must be greater than 0");
        }

        if spec.agents.heartbeat_interval_secs == 0 {
            anyhow::bail!("spec.agents.heartbeat_interval_secs must be greater than 0");
        }

        if spec.agents.poll_interval_ms == 0 {
            anyhow::bail!("spec.agents.poll_interval_ms must be greater than 0");
        }

        // At least one missed heartbeat must fit inside the timeout.
        if spec.registry.heartbeat_timeout_secs <= spec.agents.heartbeat_interval_secs {
            anyhow::bail!(
                "spec.registry.heartbeat_timeout_secs ({}) must exceed spec.agents.heartbeat_interval_secs ({})",
                spec.registry.heartbeat_timeout_secs,
                spec.agents.heartbeat_interval_secs
            );
        }

        if spec.registry.health_check_interval_secs == 0 {
            anyhow::bail!("spec.registry.health_check_interval_secs must be greater than 0");
        }

        if spec.detection.scan_interval_secs == 0 {
            anyhow::bail!("spec.detection.scan_interval_secs must be greater than 0");
        }

        let threshold = spec.detection.error_rate_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            anyhow::bail!(
                "spec.detection.error_rate_threshold must be in (0, 1], got {}",
                threshold
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let config = NexusConfig::default();
        assert_eq!(config.api_version, "nexus.dev/v1");
        assert_eq!(config.kind, "NexusConfig");
        assert_eq!(config.spec.bus.mailbox_capacity, 1000);
        assert_eq!(config.spec.bus.history_ttl(), Duration::from_secs(3600));
        assert_eq!(config.spec.agents.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.spec.registry.heartbeat_timeout(), Duration::from_secs(60));
        assert_eq!(config.spec.bus.inline_delivery, InlineDeliveryPolicy::Retain);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
apiVersion: nexus.dev/v1
kind: NexusConfig
metadata:
  name: edge-1
spec:
  bus:
    mailbox_capacity: 50
    inline_delivery: consume_on_success
  registry:
    heartbeat_timeout_secs: 90
"#;
        let config = NexusConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.metadata.name, "edge-1");
        assert_eq!(config.spec.bus.mailbox_capacity, 50);
        assert_eq!(config.spec.bus.history_ttl_minutes, 60);
        assert_eq!(
            config.spec.bus.inline_delivery,
            InlineDeliveryPolicy::ConsumeOnSuccess
        );
        assert_eq!(config.spec.registry.heartbeat_timeout_secs, 90);
        assert_eq!(config.spec.agents.poll_interval_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexus-config.yaml");

        let mut config = NexusConfig::default();
        config.metadata.name = "roundtrip".to_string();
        config.spec.detection.error_rate_threshold = 0.3;
        config.to_yaml_file(&path).unwrap();

        let loaded = NexusConfig::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "roundtrip");
        assert_eq!(loaded.spec.detection.error_rate_threshold, 0.3);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let result = NexusConfig::load_or_default(Some(PathBuf::from("/nonexistent/nexus.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = NexusConfig::default();
        assert!(config.validate().is_ok());

        config.api_version = "wrong/v1".to_string();
        assert!(config.validate().is_err());
        config.api_version = API_VERSION.to_string();

        config.kind = "WrongKind".to_string();
        assert!(config.validate().is_err());
        config.kind = CONFIG_KIND.to_string();

        config.spec.bus.mailbox_capacity = 0;
        assert!(config.validate().is_err());
        config.spec.bus.mailbox_capacity = 10;

        // Timeout must leave room for a missed heartbeat
        config.spec.registry.heartbeat_timeout_secs = 30;
        assert!(config.validate().is_err());
        config.spec.registry.heartbeat_timeout_secs = 60;

        config.spec.detection.error_rate_threshold = 0.0;
        assert!(config.validate().is_err());
        config.spec.detection.error_rate_threshold = 1.0;
        assert!(config.validate().is_ok());
    }
}
