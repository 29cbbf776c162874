use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct OAuthProtectedResourceMetadata {
    pub resource_name: String,
    pub resource: String,
    pub authorization_servers: Vec<String>,
    pub bearer_methods_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
}

pub async fn get_oauth_protected_resource(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cfg = &state.options.oauth;
    Json(OAuthProtectedResourceMetadata {
        resource_name: cfg
            .resource_name
            .clone()
            .unwrap_or_else(|| "mcp-gateway".to_string()),
        resource: cfg.resource.clone().unwrap_or_default(),
        authorization_servers: cfg.authorization_servers.clone(),
        bearer_methods_supported: cfg.bearer_methods_supported.clone(),
        scopes_supported: cfg.scopes_supported.clone(),
    })
}
