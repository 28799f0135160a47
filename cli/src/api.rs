// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Operator HTTP API over a running swarm
//!
//! | Method | Path | Returns |
//! |--------|------|---------|
//! | GET | `/health` | liveness and uptime |
//! | GET | `/api/incidents?status=` | incidents, optionally filtered by status |
//! | GET | `/api/incidents/{incident_id}` | one incident with timeline and evidence |
//! | POST | `/api/incidents/{incident_id}/resolve` | the resolved incident |
//! | GET | `/api/incidents/{incident_id}/remediation` | the remediation plan |
//! | GET | `/api/agents/status` | registry records and agent snapshots |
//! | GET | `/api/stats` | message bus statistics |

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

use nexus_swarm::{Incident, IncidentError, IncidentResponseSwarm, IncidentStatus, RemediationPlan};

struct ApiState {
    swarm: Arc<IncidentResponseSwarm>,
    started: Instant,
}

/// Error body `{"error": ...}` with a matching status code.
struct ApiError(StatusCode, String);

impl From<IncidentError> for ApiError {
    fn from(e: IncidentError) -> Self {
        let status = match e {
            IncidentError::NotFound(_) => StatusCode::NOT_FOUND,
            IncidentError::InvalidTransition { .. } => StatusCode::CONFLICT,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct IncidentFilter {
    status: Option<IncidentStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolveRequest {
    #[serde(default)]
    reason: String,
}

pub fn router(swarm: Arc<IncidentResponseSwarm>) -> Router {
    let state = Arc::new(ApiState {
        swarm,
        started: Instant::now(),
    });

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/incidents", get(list_incidents_handler))
        .route("/api/incidents/{incident_id}", get(get_incident_handler))
        .route("/api/incidents/{incident_id}/resolve", post(resolve_incident_handler))
        .route("/api/incidents/{incident_id}/remediation", get(remediation_handler))
        .route("/api/agents/status", get(agent_status_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(state)
}

/// Serve the API on `0.0.0.0:port` until `shutdown` completes.
pub async fn serve(
    swarm: Arc<IncidentResponseSwarm>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "API listening");

    axum::serve(listener, router(swarm))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}

async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started.elapsed().as_secs(),
        "bus_running": state.swarm.context().bus().is_running(),
    }))
}

async fn list_incidents_handler(
    State(state): State<Arc<ApiState>>,
    Query(filter): Query<IncidentFilter>,
) -> Json<Vec<Incident>> {
    let mut incidents = state.swarm.analyzer().incidents();
    if let Some(status) = filter.status {
        incidents.retain(|incident| incident.status == status);
    }
    incidents.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
    Json(incidents)
}

async fn get_incident_handler(
    State(state): State<Arc<ApiState>>,
    Path(incident_id): Path<String>,
) -> Result<Json<Incident>, ApiError> {
    state
        .swarm
        .analyzer()
        .get_incident(&incident_id)
        .map(Json)
        .ok_or_else(|| IncidentError::NotFound(incident_id).into())
}

async fn resolve_incident_handler(
    State(state): State<Arc<ApiState>>,
    Path(incident_id): Path<String>,
    body: Option<Json<ResolveRequest>>,
) -> Result<Json<Incident>, ApiError> {
    let reason = body.map(|Json(request)| request.reason).unwrap_or_default();
    let incident = state.swarm.analyzer().resolve_incident(&incident_id, &reason)?;
    Ok(Json(incident))
}

/// The stored plan, or a fresh one for incidents the remediator has not
/// planned yet.
async fn remediation_handler(
    State(state): State<Arc<ApiState>>,
    Path(incident_id): Path<String>,
) -> Result<Json<RemediationPlan>, ApiError> {
    let remediator = state.swarm.remediator();
    if let Some(plan) = remediator.get_plan(&incident_id) {
        return Ok(Json(plan));
    }
    let incident = state
        .swarm
        .analyzer()
        .get_incident(&incident_id)
        .ok_or(IncidentError::NotFound(incident_id))?;
    Ok(Json(remediator.generate_plan(&incident)))
}

async fn agent_status_handler(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let snapshot = state.swarm.snapshot();
    Json(json!({
        "agents": snapshot.agents,
        "agent_states": snapshot.agent_states,
    }))
}

async fn stats_handler(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let snapshot = state.swarm.snapshot();
    let active = snapshot
        .incidents
        .iter()
        .filter(|incident| incident.status.is_active())
        .count();
    Json(json!({
        "bus": snapshot.bus,
        "total_incidents": snapshot.incidents.len(),
        "active_incidents": active,
        "remediation_plans": snapshot.plans.len(),
    }))
}
