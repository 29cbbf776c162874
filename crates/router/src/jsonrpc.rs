//! JSON-RPC 2.0 envelope validation and method dispatch tagging. Styled after
//! the reference stack's `#[serde(tag = ...)]` enums (`identity/src/logic/*`),
//! but hand-classified here since the inbound body shape varies per method.

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum RpcValidationError {
    #[error("missing or invalid jsonrpc version")]
    BadVersion,
    #[error("missing or empty method")]
    EmptyMethod,
    #[error("missing id for non-notification method")]
    MissingId,
    #[error("malformed JSON body: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub enum RpcMethod {
    Initialize,
    NotificationsInitialized,
    ToolsList,
    ToolsCall { name: String },
    Notification(String),
    Other(String),
}

#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub id: Option<Value>,
    pub method: RpcMethod,
    pub body: Value,
}

pub fn parse(bytes: &[u8]) -> Result<RpcRequest, RpcValidationError> {
    let body: Value = serde_json::from_slice(bytes)?;

    let version = body.get("jsonrpc").and_then(Value::as_str);
    if version != Some("2.0") {
        return Err(RpcValidationError::BadVersion);
    }

    let method_str = body
        .get("method")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or(RpcValidationError::EmptyMethod)?;

    let id = body.get("id").cloned();
    if id.is_none() && !method_str.starts_with("notifications/") {
        return Err(RpcValidationError::MissingId);
    }

    let method = match method_str {
        "initialize" => RpcMethod::Initialize,
        "notifications/initialized" => RpcMethod::NotificationsInitialized,
        "tools/list" => RpcMethod::ToolsList,
        "tools/call" => {
            let name = body
                .pointer("/params/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            RpcMethod::ToolsCall { name }
        }
        other if other.starts_with("notifications/") => RpcMethod::Notification(other.to_string()),
        other => RpcMethod::Other(other.to_string()),
    };

    Ok(RpcRequest { id, method, body })
}
