//! Request-header and request-body phase logic. Pure functions over captured
//! header state so `service.rs` can drive them from the streaming loop
//! without duplicating the ext_proc message plumbing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gateway_proto::ext_proc::processing_response::Response as RpcResponse;
use gateway_proto::ext_proc::{
    BodyMutation, BodyResponse, CommonResponse, CommonResponseStatus, HttpStatus,
    ImmediateResponse, ProcessingResponse,
};
use serde_json::json;
use session::SessionCache;
use shared::primitives::WrappedUuidV4;
use tracing::{debug, warn};
pub use upstream::client::{INIT_HOST_HEADER, MCP_SESSION_HEADER, ROUTING_KEY_HEADER};
use upstream::{MeshBootstrap, UpstreamManager};

use crate::headers::HeaderMutationBuilder;
use crate::jsonrpc::{self, RpcMethod};
use crate::state::RouterState;

pub const SERVERNAME_HEADER: &str = "x-mcp-servername";
pub const ANNOTATION_HEADER: &str = "x-mcp-annotation-hints";
pub const METHOD_HEADER: &str = "x-mcp-method";
pub const TOOLNAME_HEADER: &str = "x-mcp-toolname";

pub type HeaderBag = HashMap<String, String>;

pub fn continue_with_mutation(
    header_mutation: gateway_proto::ext_proc::HeaderMutation,
) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(RpcResponse::RequestHeaders(
            gateway_proto::ext_proc::HeadersResponse {
                response: Some(CommonResponse {
                    status: CommonResponseStatus::Continue as i32,
                    header_mutation: Some(header_mutation),
                    body_mutation: None,
                    clear_route_cache: false,
                }),
            },
        )),
    }
}

pub async fn handle_request_headers(
    state: &RouterState,
    headers: &HeaderBag,
) -> (ProcessingResponse, HeaderBag) {
    let mutation = HeaderMutationBuilder::default()
        .set(":authority", &state.config.broker_authority)
        .build();
    (continue_with_mutation(mutation), headers.clone())
}

fn immediate(status: u16, body: serde_json::Value, details: &str) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(RpcResponse::ImmediateResponse(ImmediateResponse {
            status: Some(HttpStatus { code: status as i32 }),
            headers: Some(
                HeaderMutationBuilder::default()
                    .set("content-type", "application/json")
                    .build(),
            ),
            body: body.to_string().into_bytes(),
            details: details.to_string(),
        })),
    }
}

/// Tool-not-found is an MCP-layer error, not an HTTP one: a 200 carrying a
/// JSON-RPC result over SSE framing, exactly as a streamable-HTTP server
/// would have answered.
fn tool_not_found() -> ProcessingResponse {
    let payload = json!({
        "result": {
            "content": [{"type": "text", "text": "MCP error -32602: Tool not found"}],
            "isError": true,
        }
    });
    ProcessingResponse {
        response: Some(RpcResponse::ImmediateResponse(ImmediateResponse {
            status: Some(HttpStatus { code: 200 }),
            headers: Some(
                HeaderMutationBuilder::default()
                    .set("content-type", "text/event-stream")
                    .build(),
            ),
            body: format!("event: message\ndata: {payload}\n\n").into_bytes(),
            details: "unknown tool".to_string(),
        })),
    }
}

fn body_continue(
    header_mutation: Option<gateway_proto::ext_proc::HeaderMutation>,
    new_body: Option<Vec<u8>>,
    clear_route_cache: bool,
) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(RpcResponse::RequestBody(BodyResponse {
            response: Some(CommonResponse {
                status: CommonResponseStatus::Continue as i32,
                header_mutation,
                body_mutation: new_body.map(|body| BodyMutation {
                    mutation: Some(gateway_proto::ext_proc::body_mutation::Mutation::Body(body)),
                }),
                clear_route_cache,
            }),
        })),
    }
}

pub struct BodyPhaseOutcome {
    pub response: ProcessingResponse,
    pub upstream_id: Option<String>,
}

fn no_upstream(response: ProcessingResponse) -> BodyPhaseOutcome {
    BodyPhaseOutcome {
        response,
        upstream_id: None,
    }
}

pub async fn handle_request_body(
    state: &RouterState,
    request_headers: &HeaderBag,
    body_bytes: &[u8],
) -> BodyPhaseOutcome {
    let request = match jsonrpc::parse(body_bytes) {
        Ok(r) => r,
        Err(e) => {
            return no_upstream(immediate(
                400,
                json!({"error": {"code": -32600, "message": e.to_string()}}),
                "invalid jsonrpc envelope",
            ));
        }
    };

    match request.method {
        RpcMethod::Initialize => {
            no_upstream(handle_bootstrap_or_passthrough(state, request_headers, "initialize"))
        }
        RpcMethod::NotificationsInitialized => no_upstream(handle_bootstrap_or_passthrough(
            state,
            request_headers,
            "notifications/initialized",
        )),
        RpcMethod::ToolsCall { name } => {
            handle_tools_call(state, request_headers, &name, request.body).await
        }
        RpcMethod::ToolsList => no_upstream(defer_to_broker("tools/list")),
        RpcMethod::Notification(method) | RpcMethod::Other(method) => {
            no_upstream(defer_to_broker(&method))
        }
    }
}

fn defer_to_broker(method: &str) -> ProcessingResponse {
    let mutation = HeaderMutationBuilder::default()
        .set(METHOD_HEADER, method)
        .set(SERVERNAME_HEADER, "mcpBroker")
        .build();
    body_continue(Some(mutation), None, false)
}

/// `initialize`-family requests either bootstrap an upstream session on the
/// Router's own behalf (authenticated by the shared routing key) or fall
/// through to the Broker.
fn handle_bootstrap_or_passthrough(
    state: &RouterState,
    headers: &HeaderBag,
    method: &str,
) -> ProcessingResponse {
    let init_host = headers.get(INIT_HOST_HEADER);
    let routing_key = headers.get(ROUTING_KEY_HEADER);

    if let (Some(host), Some(key)) = (init_host, routing_key) {
        if key == &state.config.routing_key {
            debug!(host, "redirecting mesh bootstrap call");
            let mutation = HeaderMutationBuilder::default()
                .set(":authority", host.clone())
                .remove(INIT_HOST_HEADER)
                .remove(ROUTING_KEY_HEADER)
                .build();
            return body_continue(Some(mutation), None, true);
        }
    }

    defer_to_broker(method)
}

async fn handle_tools_call(
    state: &RouterState,
    headers: &HeaderBag,
    gateway_tool_name: &str,
    body: serde_json::Value,
) -> BodyPhaseOutcome {
    if gateway_tool_name.is_empty() {
        return no_upstream(immediate(
            400,
            json!({"error": {"code": -32602, "message": "missing tool name"}}),
            "tools/call without params.name",
        ));
    }

    let Some(downstream_token) = headers.get(MCP_SESSION_HEADER).filter(|s| !s.is_empty()) else {
        return no_upstream(immediate(
            400,
            json!({"error": {"code": -32600, "message": "missing mcp-session-id"}}),
            "tools/call without a session",
        ));
    };

    let validated = match state.session_tokens.validate(downstream_token) {
        Ok(v) => v,
        Err(e) => {
            return no_upstream(immediate(
                404,
                json!({"error": {"message": format!("session no longer valid: {e}")}}),
                "downstream session invalid or expired",
            ));
        }
    };

    let Some((manager, original_name)) = state.registry.find_tool(gateway_tool_name).await else {
        return no_upstream(tool_not_found());
    };

    let upstream_id = manager.config().id.clone();
    let annotations = manager
        .get_annotations(&original_name)
        .unwrap_or_default()
        .to_header_value();

    let authority = state
        .upstream_authority(&upstream_id)
        .unwrap_or_else(|| manager.config().base_url.to_string());
    let path = state.upstream_path(&upstream_id).unwrap_or_default();

    let upstream_session_id = match state
        .session_cache
        .get_upstream_session(&validated.session_id, &upstream_id)
    {
        Some(existing) => existing,
        None => {
            match open_upstream_session(state, &manager, &authority, validated.session_id, validated.expires_at)
                .await
            {
                Ok(session) => session,
                Err(response) => return no_upstream(response),
            }
        }
    };

    let mut new_body = body;
    if let Some(name) = new_body.pointer_mut("/params/name") {
        *name = json!(original_name);
    }
    let new_body_bytes = new_body.to_string().into_bytes();

    let mutation = HeaderMutationBuilder::default()
        .set(METHOD_HEADER, "tools/call")
        .set(TOOLNAME_HEADER, original_name)
        .set(SERVERNAME_HEADER, manager.config().name.clone())
        .set(ANNOTATION_HEADER, annotations)
        .set(MCP_SESSION_HEADER, upstream_session_id)
        .set(":authority", authority)
        .set(":path", path)
        .set("content-length", new_body_bytes.len().to_string())
        .build();

    BodyPhaseOutcome {
        response: body_continue(Some(mutation), Some(new_body_bytes), true),
        upstream_id: Some(upstream_id),
    }
}

/// Lazily initializes an upstream session for this `(downstream, upstream)`
/// pair and commits it to the cache. Exactly one concurrent caller wins the
/// commit; a loser closes the session it just opened and adopts the winner's.
async fn open_upstream_session(
    state: &RouterState,
    manager: &Arc<UpstreamManager>,
    authority: &str,
    downstream: WrappedUuidV4,
    expires_at: DateTime<Utc>,
) -> Result<String, ProcessingResponse> {
    let mesh = MeshBootstrap {
        host: authority.to_string(),
        key: state.config.routing_key.clone(),
    };
    let upstream_id = manager.config().id.clone();

    let fresh = match manager.open_session(Some(&mesh)).await {
        Ok(fresh) => fresh,
        Err(e) => {
            warn!(upstream = %upstream_id, error = %e, "failed to bootstrap upstream session");
            return Err(immediate(
                e.http_status(),
                json!({"error": {"message": format!("upstream initialize failed: {e}")}}),
                "lazy upstream session bootstrap failed",
            ));
        }
    };

    if state
        .session_cache
        .put(downstream, upstream_id.clone(), fresh.clone())
    {
        schedule_expiry_teardown(
            state.session_cache.clone(),
            manager.clone(),
            downstream,
            upstream_id,
            fresh.clone(),
            expires_at,
        );
        return Ok(fresh);
    }

    // Lost the race: another request already committed a session for this
    // pair. Close ours and use theirs.
    let manager = manager.clone();
    tokio::spawn(async move {
        manager.close_session(&fresh).await;
    });
    match state
        .session_cache
        .get_upstream_session(&downstream, &upstream_id)
    {
        Some(existing) => Ok(existing),
        None => Err(immediate(
            500,
            json!({"error": {"message": "upstream session vanished during bootstrap"}}),
            "session cache race",
        )),
    }
}

/// Tears the upstream session down when the downstream token it belongs to
/// expires, unless a newer session already replaced it.
fn schedule_expiry_teardown(
    cache: Arc<SessionCache>,
    manager: Arc<UpstreamManager>,
    downstream: WrappedUuidV4,
    upstream_id: String,
    upstream_session: String,
    expires_at: DateTime<Utc>,
) {
    let delay = (expires_at - Utc::now())
        .to_std()
        .unwrap_or(std::time::Duration::ZERO);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if cache.get_upstream_session(&downstream, &upstream_id).as_deref()
            == Some(upstream_session.as_str())
        {
            debug!(downstream = %downstream, upstream = %upstream_id, "expiring upstream session");
            cache.remove_upstream_session(&downstream, &upstream_id);
            manager.close_session(&upstream_session).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use broker::{GatewayConfig, Registry};
    use gateway_proto::ext_proc::processing_response::Response as RpcResponse;
    use session::{SessionCache, SessionTokenManager};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::RouterConfig;
    use crate::state::RouterState;

    fn test_state() -> std::sync::Arc<RouterState> {
        let registry = Registry::new(reqwest::Client::new(), std::time::Duration::from_secs(60));
        let cache = std::sync::Arc::new(SessionCache::new());
        let tokens =
            SessionTokenManager::new(b"test-secret".to_vec(), chrono::Duration::minutes(5));
        RouterState::new(
            registry,
            cache,
            tokens,
            RouterConfig::new("gateway.internal", "shared-routing-secret"),
        )
    }

    fn upstream_config_doc(url: &str) -> GatewayConfig {
        GatewayConfig::from_json(
            format!(
                r#"{{"servers":[{{"name":"echo","url":"{url}","tool_prefix":"s1_"}}],"virtual_servers":[]}}"#
            )
            .as_bytes(),
        )
        .unwrap()
    }

    async fn wait_for_tool(state: &RouterState, gateway_name: &str) {
        for _ in 0..100 {
            if state.registry.find_tool(gateway_name).await.is_some() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("upstream tool {gateway_name} never became routable");
    }

    fn mount_upstream_body() -> serde_json::Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {"listChanged": true}},
                "tools": [{"name": "echo", "annotations": {"readOnlyHint": true}}],
            },
        })
    }

    #[tokio::test]
    async fn tools_call_without_session_header_is_rejected() {
        let state = test_state();
        let outcome = handle_request_body(
            &state,
            &HeaderBag::new(),
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"ns_echo"}}"#,
        )
        .await;
        match outcome.response.response {
            Some(RpcResponse::ImmediateResponse(resp)) => {
                assert_eq!(resp.status.unwrap().code, 400);
            }
            other => panic!("expected immediate response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_session_token_is_rejected_with_404() {
        let state = test_state();
        let expired =
            SessionTokenManager::new(b"test-secret".to_vec(), chrono::Duration::seconds(-1));
        let (_, token) = expired.issue();
        let mut headers = HeaderBag::new();
        headers.insert(MCP_SESSION_HEADER.to_string(), token);

        let outcome = handle_request_body(
            &state,
            &headers,
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"ns_echo"}}"#,
        )
        .await;
        match outcome.response.response {
            Some(RpcResponse::ImmediateResponse(resp)) => {
                assert_eq!(resp.status.unwrap().code, 404);
            }
            other => panic!("expected immediate response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_mcp_error_payload_over_sse() {
        let state = test_state();
        let mut headers = HeaderBag::new();
        let (_, token) = state.session_tokens.issue();
        headers.insert(MCP_SESSION_HEADER.to_string(), token);

        let outcome = handle_request_body(
            &state,
            &headers,
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"no_such_tool"}}"#,
        )
        .await;
        match outcome.response.response {
            Some(RpcResponse::ImmediateResponse(resp)) => {
                assert_eq!(resp.status.unwrap().code, 200);
                let body = String::from_utf8(resp.body).unwrap();
                assert!(body.starts_with("event: message\ndata: "));
                assert!(body.contains("Tool not found"));
            }
            other => panic!("expected immediate response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn initialize_without_bootstrap_headers_is_deferred_to_broker() {
        let state = test_state();
        let outcome = handle_request_body(
            &state,
            &HeaderBag::new(),
            br#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
        )
        .await;
        match outcome.response.response {
            Some(RpcResponse::RequestBody(resp)) => {
                let mutation = resp.response.unwrap().header_mutation.unwrap();
                let set: Vec<_> = mutation
                    .set_headers
                    .iter()
                    .filter_map(|h| h.header.as_ref())
                    .collect();
                assert!(
                    set.iter()
                        .any(|h| h.key == SERVERNAME_HEADER && h.value == "mcpBroker")
                );
                assert!(set.iter().any(|h| h.key == METHOD_HEADER && h.value == "initialize"));
            }
            other => panic!("expected request body response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bootstrap_headers_with_matching_key_redirect_authority() {
        let state = test_state();
        let mut headers = HeaderBag::new();
        headers.insert(INIT_HOST_HEADER.to_string(), "echo.svc".to_string());
        headers.insert(ROUTING_KEY_HEADER.to_string(), "shared-routing-secret".to_string());

        let outcome = handle_request_body(
            &state,
            &headers,
            br#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
        )
        .await;
        match outcome.response.response {
            Some(RpcResponse::RequestBody(resp)) => {
                let common = resp.response.unwrap();
                assert!(common.clear_route_cache);
                let mutation = common.header_mutation.unwrap();
                assert!(
                    mutation
                        .set_headers
                        .iter()
                        .any(|h| h.header.as_ref().unwrap().key == ":authority"
                            && h.header.as_ref().unwrap().value == "echo.svc")
                );
                assert!(mutation.remove_headers.contains(&INIT_HOST_HEADER.to_string()));
                assert!(mutation.remove_headers.contains(&ROUTING_KEY_HEADER.to_string()));
            }
            other => panic!("expected request body response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bootstrap_headers_with_wrong_key_fall_through_to_broker() {
        let state = test_state();
        let mut headers = HeaderBag::new();
        headers.insert(INIT_HOST_HEADER.to_string(), "echo.svc".to_string());
        headers.insert(ROUTING_KEY_HEADER.to_string(), "wrong".to_string());

        let outcome = handle_request_body(
            &state,
            &headers,
            br#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
        )
        .await;
        match outcome.response.response {
            Some(RpcResponse::RequestBody(resp)) => {
                let mutation = resp.response.unwrap().header_mutation.unwrap();
                assert!(
                    mutation
                        .set_headers
                        .iter()
                        .any(|h| h.header.as_ref().unwrap().key == SERVERNAME_HEADER)
                );
            }
            other => panic!("expected request body response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tools_call_strips_prefix_and_injects_upstream_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("mcp-session-id", "up-sess-1")
                    .set_body_json(mount_upstream_body()),
            )
            .mount(&server)
            .await;

        let state = test_state();
        state
            .registry
            .apply_config(upstream_config_doc(&server.uri()))
            .await;
        wait_for_tool(&state, "s1_echo").await;

        let (_, token) = state.session_tokens.issue();
        let mut headers = HeaderBag::new();
        headers.insert(MCP_SESSION_HEADER.to_string(), token);

        let outcome = handle_request_body(
            &state,
            &headers,
            br#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"s1_echo","arguments":{"text":"hi"}}}"#,
        )
        .await;

        assert!(outcome.upstream_id.is_some());
        match outcome.response.response {
            Some(RpcResponse::RequestBody(resp)) => {
                let common = resp.response.unwrap();
                assert!(common.clear_route_cache);

                let mutation = common.header_mutation.unwrap();
                let lookup = |key: &str| {
                    mutation
                        .set_headers
                        .iter()
                        .filter_map(|h| h.header.as_ref())
                        .find(|h| h.key == key)
                        .map(|h| h.value.clone())
                };
                assert_eq!(lookup(TOOLNAME_HEADER).as_deref(), Some("echo"));
                assert_eq!(lookup(SERVERNAME_HEADER).as_deref(), Some("echo"));
                assert_eq!(lookup(MCP_SESSION_HEADER).as_deref(), Some("up-sess-1"));
                assert!(
                    lookup(ANNOTATION_HEADER)
                        .unwrap()
                        .starts_with("readOnly=true")
                );

                let new_body = match common.body_mutation.unwrap().mutation.unwrap() {
                    gateway_proto::ext_proc::body_mutation::Mutation::Body(b) => b,
                    other => panic!("expected full body replacement, got {other:?}"),
                };
                let parsed: serde_json::Value = serde_json::from_slice(&new_body).unwrap();
                assert_eq!(parsed["params"]["name"], "echo");
                assert_eq!(parsed["params"]["arguments"]["text"], "hi");
                assert_eq!(
                    lookup("content-length").as_deref(),
                    Some(new_body.len().to_string().as_str())
                );
            }
            other => panic!("expected request body response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_tools_call_reuses_the_cached_upstream_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("mcp-session-id", "up-sess-1")
                    .set_body_json(mount_upstream_body()),
            )
            .mount(&server)
            .await;

        let state = test_state();
        state
            .registry
            .apply_config(upstream_config_doc(&server.uri()))
            .await;
        wait_for_tool(&state, "s1_echo").await;

        let (session_id, token) = state.session_tokens.issue();
        let mut headers = HeaderBag::new();
        headers.insert(MCP_SESSION_HEADER.to_string(), token);
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"s1_echo"}}"#;

        handle_request_body(&state, &headers, body).await;
        let first = state.session_cache.get(&session_id);
        handle_request_body(&state, &headers, body).await;
        let second = state.session_cache.get(&session_id);

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_upstream_surfaces_mapped_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("mcp-session-id", "up-sess-1")
                    .set_body_json(mount_upstream_body()),
            )
            .up_to_n_times(3)
            .mount(&server)
            .await;
        // Discovery succeeds, then the upstream dies before the lazy
        // per-downstream initialize.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let state = test_state();
        state
            .registry
            .apply_config(upstream_config_doc(&server.uri()))
            .await;
        wait_for_tool(&state, "s1_echo").await;

        let (_, token) = state.session_tokens.issue();
        let mut headers = HeaderBag::new();
        headers.insert(MCP_SESSION_HEADER.to_string(), token);

        let outcome = handle_request_body(
            &state,
            &headers,
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"s1_echo"}}"#,
        )
        .await;
        match outcome.response.response {
            Some(RpcResponse::ImmediateResponse(resp)) => {
                assert_eq!(resp.status.unwrap().code, 500);
            }
            other => panic!("expected immediate response, got {other:?}"),
        }
    }
}
