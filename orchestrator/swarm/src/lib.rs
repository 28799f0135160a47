// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `nexus-swarm` - Incident-Response Agents
//!
//! The three cooperating agents of a NEXUS node, built only on the public
//! `nexus-core` API: a log ingester (perception), an analyzer (incident
//! detection and root cause hypotheses) and a remediator (plans, runbooks and
//! scripts).
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | Log entries, anomalies, incidents, hypotheses, remediation templates |
//! | [`application`] | Application | `LogIngester`, `Analyzer`, `Remediator`, `IncidentResponseSwarm` |
//!
//! ## Key Concepts
//!
//! - **Log analysis**: every non-empty log batch becomes one `log_analysis`
//!   broadcast carrying a summary, anomalies and the most recent entries.
//! - **Incident**: opened per service when its error rate in a batch exceeds
//!   the detection threshold; broadcast as `incident_detected`.
//! - **Hypothesizer**: pluggable root-cause source; the keyword matcher is
//!   the default.
//! - **Remediation plan**: rendered from a static template library keyed by
//!   the incident's keyword classification.

pub mod application;
pub mod domain;

pub use application::analyzer::{Analyzer, ANALYZER_ID};
pub use application::ingester::{IngestError, LogIngester, LOG_INGESTER_ID};
pub use application::remediator::{Remediator, REMEDIATOR_ID};
pub use application::swarm::{IncidentResponseSwarm, SwarmSnapshot};
pub use domain::*;
