// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # NEXUS Node CLI
//!
//! The `nexus` binary runs the incident-response agents of one node.
//!
//! ## Commands
//!
//! - `nexus run [--mode demo|agents-only] [--logs-dir DIR]` - Run the agent swarm
//! - `nexus config show|validate|generate` - Configuration management

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use nexus_core::NexusConfig;
use nexus_node::commands::{self, ConfigCommand, RunArgs};
use nexus_node::telemetry;

/// NEXUS Node - Multi-agent incident response
#[derive(Parser)]
#[command(name = "nexus")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "NEXUS_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(long, global = true, env = "NEXUS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (compact, json). Defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Serve Prometheus metrics on this port
    #[arg(long, global = true)]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the incident response agents
    #[command(name = "run")]
    Run(RunArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A broken config file must not prevent `config validate` from reporting it.
    let observability = NexusConfig::load_or_default(cli.config.clone())
        .map(|config| config.spec.observability)
        .unwrap_or_default();

    let level = cli.log_level.unwrap_or(observability.log_level);
    let format = cli.log_format.unwrap_or(observability.log_format);
    telemetry::init_logging(&level, &format)?;

    if let Some(port) = cli.metrics_port.or(observability.metrics_port) {
        telemetry::init_metrics(port)?;
    }

    match cli.command {
        Some(Commands::Run(args)) => commands::run::execute(args, cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
