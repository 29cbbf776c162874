//! The Broker's public MCP surface: `initialize`, `tools/list`,
//! `notifications/tools/list_changed`, explicit session teardown via
//! `DELETE /mcp`, and a stub `tools/call` for standalone deployments where
//! the Router never intercepted the request.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::{Json, http::StatusCode};
use serde_json::{Value, json};
use tracing::debug;

use crate::filter::{FilterOptions, apply_filters};
use crate::state::AppState;

const MCP_SESSION_HEADER: &str = "mcp-session-id";
const VIRTUAL_SERVER_HEADER: &str = "x-mcp-virtualserver";
const AUTHORIZED_TOOLS_HEADER: &str = "x-authorized-tools";

pub async fn handle_mcp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let method = body.get("method").and_then(Value::as_str).unwrap_or("");
    let id = body.get("id").cloned();

    match method {
        "initialize" => handle_initialize(&state, id).await,
        "tools/list" => handle_tools_list(&state, &headers, id).await,
        "notifications/initialized" => (StatusCode::ACCEPTED, Json(Value::Null)).into_response(),
        "tools/call" => {
            let body = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "isError": true,
                    "content": [{"type": "text", "text": "mcp gateway broker doesn't forward tool calls"}],
                },
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        other => {
            debug!(method = other, "unhandled method at broker");
            let body = json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {other}")},
            });
            (StatusCode::OK, Json(body)).into_response()
        }
    }
}

/// Explicit client teardown: forget every upstream session this downstream
/// session holds and best-effort close them upstream-side. The token itself
/// stays cryptographically valid until its TTL passes; a torn-down session
/// simply re-initializes its upstream sessions lazily if reused.
pub async fn handle_mcp_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(token) = headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Ok(validated) = state.session_tokens.validate(token) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let closed = state.session_cache.delete_all(&validated.session_id);
    debug!(session = %validated.session_id, upstream_sessions = closed.len(), "client teardown");
    for (upstream_id, upstream_session) in closed {
        if let Some(manager) = state.registry.get(&upstream_id).await {
            tokio::spawn(async move {
                manager.close_session(&upstream_session).await;
            });
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_initialize(state: &AppState, id: Option<Value>) -> axum::response::Response {
    let (_, token) = state.session_tokens.issue();

    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2025-03-26",
            "serverInfo": {"name": "mcp-gateway", "version": env!("CARGO_PKG_VERSION")},
            "capabilities": {"tools": {"listChanged": true}},
        },
    });

    let mut response = (StatusCode::OK, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&token) {
        response.headers_mut().insert(MCP_SESSION_HEADER, value);
    }
    response
}

async fn handle_tools_list(
    state: &AppState,
    headers: &HeaderMap,
    id: Option<Value>,
) -> axum::response::Response {
    let catalog = state.registry.aggregated_catalog().await;
    let virtual_servers = state.registry.virtual_servers().await;

    let authorized_tools = headers
        .get(AUTHORIZED_TOOLS_HEADER)
        .and_then(|v| v.to_str().ok());
    let virtual_server = headers
        .get(VIRTUAL_SERVER_HEADER)
        .and_then(|v| v.to_str().ok());

    let filtered = apply_filters(
        &catalog,
        authorized_tools,
        virtual_server,
        &virtual_servers,
        FilterOptions {
            enforce_tool_filter: state.options.enforce_tool_filter,
            allowlist_public_key_pem: state.options.allowlist_public_key_pem.as_deref(),
        },
    );

    let tools: Vec<Value> = filtered
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool.gateway_name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
                "annotations": {
                    "readOnlyHint": tool.annotations.read_only_hint,
                    "destructiveHint": tool.annotations.destructive_hint,
                    "idempotentHint": tool.annotations.idempotent_hint,
                    "openWorldHint": tool.annotations.open_world_hint,
                },
            })
        })
        .collect();

    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"tools": tools},
    });

    (StatusCode::OK, Json(body)).into_response()
}
