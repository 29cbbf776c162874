use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use shared::error::GatewayError;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::GatewayConfig;
use crate::state::AppState;

pub async fn push_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, GatewayError> {
    if let Some(expected) = &state.options.config_push_bearer_token {
        if !bearer_matches(&headers, expected) {
            return Err(GatewayError::Authentication {
                msg: "configuration pushes require the configured bearer token".to_string(),
                source: None,
            });
        }
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json");

    let parsed = if content_type.contains("yaml") {
        GatewayConfig::from_yaml(&body)
    } else {
        GatewayConfig::from_json(&body)
    };

    let config = parsed.map_err(|e| {
        warn!(error = %e, "rejected malformed configuration push, current config retained");
        GatewayError::InvalidRequest {
            msg: e.to_string(),
            source: None,
        }
    })?;

    state.registry.apply_config(config).await;
    Ok(StatusCode::NO_CONTENT)
}

fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    let Some(presented) = value.strip_prefix("Bearer ") else {
        return false;
    };
    presented.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1
}
