use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Serialize;
use shared::error::GatewayError;
use shared::primitives::WrappedChronoDateTime;

use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct ServerValidationStatus {
    pub qualified_name: String,
    pub reachable: bool,
    pub protocol_valid: bool,
    pub protocol_version: Option<String>,
    pub capabilities: Vec<String>,
    pub tool_count: usize,
    pub conflicts: Vec<String>,
    pub last_error: Option<String>,
    pub last_validated: Option<WrappedChronoDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub upstreams: Vec<ServerValidationStatus>,
}

fn status_for(manager: &upstream::UpstreamManager) -> ServerValidationStatus {
    let snapshot = manager.snapshot();
    ServerValidationStatus {
        qualified_name: manager.config().name.clone(),
        reachable: snapshot.reachable,
        protocol_valid: snapshot.protocol_valid,
        protocol_version: snapshot.protocol_version.clone(),
        capabilities: snapshot.capabilities.clone(),
        tool_count: snapshot.tools.len(),
        conflicts: snapshot.conflicts.clone(),
        last_error: snapshot.last_error.clone(),
        last_validated: snapshot.last_validated.map(Into::into),
    }
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let upstreams = state
        .registry
        .all()
        .await
        .iter()
        .map(|manager| status_for(manager))
        .collect();
    Json(StatusResponse { upstreams })
}

pub async fn get_status_by_name(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ServerValidationStatus>, GatewayError> {
    for manager in state.registry.all().await {
        if manager.config().name == name {
            return Ok(Json(status_for(&manager)));
        }
    }
    Err(GatewayError::NotFound {
        msg: format!("no upstream registered under {name}"),
        lookup_id: name,
        source: None,
    })
}

pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}
