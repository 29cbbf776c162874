//! Wires every Broker handler onto one `axum::Router`. Mirrors the reference
//! stack's single bundling-function shape (`soma-api-server::factory`), scaled
//! down: one shared `AppState` rather than one service per router merge, since
//! the Broker has no per-resource repositories to split state over.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config_endpoint::push_config;
use crate::mcp::{handle_mcp, handle_mcp_delete};
use crate::notify::subscribe_notifications;
use crate::oauth::get_oauth_protected_resource;
use crate::state::AppState;
use crate::status::{get_status, get_status_by_name, healthz};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/mcp",
            post(handle_mcp)
                .get(subscribe_notifications)
                .delete(handle_mcp_delete),
        )
        .route("/config", post(push_config))
        .route("/status", get(get_status))
        .route("/status/{name}", get(get_status_by_name))
        .route("/healthz", get(healthz))
        .route(
            "/.well-known/oauth-protected-resource",
            get(get_oauth_protected_resource),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
