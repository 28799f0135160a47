// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `nexus run` - start the incident response swarm
//!
//! Demo mode ingests the logs directory once, waits for the pipeline to
//! settle, prints what it found and exits. Agents-only mode keeps the agents
//! running until Ctrl+C or SIGTERM, optionally serving the operator HTTP
//! API alongside.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use tokio::signal;
use tracing::{info, warn};

use nexus_core::{Liveness, NexusConfig};
use nexus_swarm::{IncidentResponseSwarm, Severity, SwarmSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Process the logs directory once, print the results and exit
    Demo,
    /// Run until interrupted
    AgentsOnly,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Run mode
    #[arg(long, value_enum, default_value_t = RunMode::Demo)]
    pub mode: RunMode,

    /// Directory scanned for *.jsonl log files (overrides spec.detection.logs_dir)
    #[arg(long, value_name = "DIR")]
    pub logs_dir: Option<PathBuf>,

    /// Seconds to wait for the pipeline to settle in demo mode
    #[arg(long, default_value_t = 10)]
    pub settle_secs: u64,

    /// Print the final snapshot as JSON instead of a report
    #[arg(long)]
    pub json: bool,

    /// Serve the operator HTTP API on this port (agents-only mode)
    #[arg(long, value_name = "PORT", env = "NEXUS_API_PORT")]
    pub api_port: Option<u16>,
}

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config =
        NexusConfig::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(dir) = args.logs_dir {
        config.spec.detection.logs_dir = dir;
    }
    config
        .validate()
        .context("Configuration validation failed")?;

    let swarm =
        Arc::new(IncidentResponseSwarm::new(&config).context("Failed to assemble swarm")?);
    swarm.start().await.context("Failed to start swarm")?;

    let outcome = match args.mode {
        RunMode::Demo => run_demo(&swarm, Duration::from_secs(args.settle_secs), args.json).await,
        RunMode::AgentsOnly => {
            info!(
                logs_dir = %config.spec.detection.logs_dir.display(),
                "Agents running, press Ctrl+C to stop"
            );
            match args.api_port {
                Some(port) => crate::api::serve(swarm.clone(), port, shutdown_signal()).await,
                None => {
                    shutdown_signal().await;
                    Ok(())
                }
            }
        }
    };

    swarm.stop().await;
    outcome
}

async fn run_demo(swarm: &IncidentResponseSwarm, settle: Duration, as_json: bool) -> Result<()> {
    let logs_dir = swarm.ingester().logs_dir().to_path_buf();
    if !logs_dir.is_dir() {
        warn!(logs_dir = %logs_dir.display(), "Logs directory does not exist");
    }

    let processed = swarm.ingest_logs_dir().await;
    info!(files = processed, logs_dir = %logs_dir.display(), "Log files ingested");

    if !swarm.wait_for_idle(settle).await {
        warn!(settle_secs = settle.as_secs(), "Pipeline did not settle, reporting partial results");
    }

    let snapshot = swarm.snapshot();
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?
        );
    } else {
        print_report(&snapshot, processed);
    }
    Ok(())
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    let label = severity.as_str().to_uppercase();
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
        Severity::Low => label.normal(),
    }
}

fn print_report(snapshot: &SwarmSnapshot, files: usize) {
    println!();
    println!("{}", "Incidents:".bold());
    if snapshot.incidents.is_empty() {
        println!("  {}", format!("none ({} log files processed)", files).dimmed());
    }
    for incident in &snapshot.incidents {
        println!("  [{}] {} {}", severity_label(incident.severity), incident.id.bold(), incident.title);
        println!("    {}", incident.description);
        println!(
            "    Services: {}  Confidence: {:.2}",
            incident.affected_services.join(", "),
            incident.confidence
        );
    }
    println!();

    println!("{}", "Remediation plans:".bold());
    if snapshot.plans.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (incident_id, plan) in &snapshot.plans {
        println!(
            "  {} → {} (priority {}, ETA {})",
            incident_id.bold(),
            plan.incident_type,
            severity_label(plan.priority),
            plan.estimated_resolution_time
        );
        for action in &plan.immediate_actions {
            println!("    - {}", action);
        }
        for step in &plan.detailed_steps {
            println!("    {}. {}", step.step_number, step.description);
        }
    }
    println!();

    println!("{}", "Registry:".bold());
    for record in snapshot.agents.values() {
        let status = match record.status {
            Liveness::Active => record.status.as_str().green(),
            Liveness::Inactive => record.status.as_str().red(),
        };
        println!(
            "  {} ({}) {}  messages: {}  errors: {}",
            record.agent_id.bold(),
            record.agent_type,
            status,
            record.message_count,
            record.error_count
        );
    }
    println!();

    let stats = &snapshot.bus.message_stats;
    println!(
        "{} sent {}  delivered {}  failed {}  dropped {}",
        "Bus:".bold(),
        stats.messages_sent,
        stats.messages_delivered,
        stats.messages_failed,
        stats.messages_dropped
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
