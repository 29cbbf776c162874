//! A minimal JSON-RPC 2.0 client for speaking MCP over Streamable-HTTP to an
//! upstream server. The reference stack has no precedent for an MCP *client*
//! (its `rmcp` usage is always server-side), so this follows the reqwest-based
//! outbound-service-client shape used for the reference stack's other
//! credentialed HTTP integrations: build a request, attach the bearer
//! credential, deserialize a typed envelope, map transport/JSON errors into a
//! single crate error.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::catalog::Tool;
use crate::config::UpstreamConfig;

pub const MCP_SESSION_HEADER: &str = "mcp-session-id";
pub const INIT_HOST_HEADER: &str = "mcp-init-host";
pub const ROUTING_KEY_HEADER: &str = "routing-key";

/// Protocol revisions this gateway speaks. An upstream negotiating anything
/// else is reported as protocol-invalid and its tools never enter the catalog.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

#[derive(Debug, Error)]
pub enum UpstreamClientError {
    #[error("transport error calling upstream")]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned malformed JSON-RPC response")]
    MalformedResponse,
    #[error("upstream returned JSON-RPC error {code}: {message}")]
    RpcError { code: i64, message: String },
    #[error("upstream session no longer valid (HTTP 404)")]
    SessionNotFound,
    #[error("upstream negotiated unsupported protocol version {0}")]
    UnsupportedProtocolVersion(String),
    #[error("upstream does not advertise the tools capability")]
    MissingToolsCapability,
}

impl UpstreamClientError {
    /// HTTP status the Router surfaces when this failure aborts a lazy
    /// session bootstrap: the upstream's own status where one exists, 404 for
    /// a dead session, 500 otherwise.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::SessionNotFound => 404,
            Self::Transport(e) => e.status().map(|s| s.as_u16()).unwrap_or(500),
            _ => 500,
        }
    }
}

/// Headers attached to outbound `initialize` calls made on behalf of a
/// downstream session, so a mesh routing through the gateway's own proxy can
/// re-intercept the call and land it on the intended upstream.
#[derive(Debug, Clone)]
pub struct MeshBootstrap {
    pub host: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug)]
pub struct InitializeOutcome {
    pub session_id: String,
    pub protocol_version: String,
    pub server_name: Option<String>,
    pub capabilities: Value,
}

impl InitializeOutcome {
    pub fn supports_tools(&self) -> bool {
        self.capabilities.get("tools").is_some()
    }

    pub fn protocol_supported(&self) -> bool {
        SUPPORTED_PROTOCOL_VERSIONS.contains(&self.protocol_version.as_str())
    }
}

/// Stateless request/response client for one upstream. Session affinity is
/// carried by the caller via the `mcp-session-id` header, matching how MCP
/// Streamable-HTTP scopes sessions.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn initialize(
        &self,
        config: &UpstreamConfig,
        mesh: Option<&MeshBootstrap>,
    ) -> Result<InitializeOutcome, UpstreamClientError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(1),
            method: "initialize",
            params: json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "mcp-gateway", "version": env!("CARGO_PKG_VERSION")},
            }),
        };

        let response = self.send(config, None, mesh, &body).await?;

        let session_id = response
            .session_id
            .ok_or(UpstreamClientError::MalformedResponse)?;

        let result = response.body.result.ok_or(UpstreamClientError::MalformedResponse)?;
        let protocol_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("2025-03-26")
            .to_string();
        let server_name = result
            .get("serverInfo")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let capabilities = result.get("capabilities").cloned().unwrap_or(Value::Null);

        Ok(InitializeOutcome {
            session_id,
            protocol_version,
            server_name,
            capabilities,
        })
    }

    /// Completes the MCP handshake for a freshly initialized session. The
    /// upstream answers 202 with no body, so only the status is checked.
    pub async fn notify_initialized(
        &self,
        config: &UpstreamConfig,
        session_id: &str,
        mesh: Option<&MeshBootstrap>,
    ) -> Result<(), UpstreamClientError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method: "notifications/initialized",
            params: json!({}),
        };
        let response = self
            .request(config, Some(session_id), mesh, &body)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(UpstreamClientError::SessionNotFound);
        }
        response.error_for_status()?;
        Ok(())
    }

    pub async fn list_tools(
        &self,
        config: &UpstreamConfig,
        session_id: &str,
    ) -> Result<Vec<Tool>, UpstreamClientError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(2),
            method: "tools/list",
            params: json!({}),
        };
        let response = self.send(config, Some(session_id), None, &body).await?;
        let result = response.body.result.ok_or(UpstreamClientError::MalformedResponse)?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or(UpstreamClientError::MalformedResponse)?;
        serde_json::from_value(tools).map_err(|_| UpstreamClientError::MalformedResponse)
    }

    /// Opens the long-lived `GET /mcp` stream the upstream pushes
    /// notifications over. The caller consumes `bytes_stream()` and feeds it
    /// through `sse::SseParser`.
    pub async fn open_listening_stream(
        &self,
        config: &UpstreamConfig,
        session_id: &str,
    ) -> Result<reqwest::Response, UpstreamClientError> {
        let mut request = self
            .http
            .get(config.base_url.clone())
            .header("accept", "text/event-stream")
            .header(MCP_SESSION_HEADER, session_id);
        if let Some(credential) = &config.credential {
            request = request.bearer_auth(credential);
        }
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(UpstreamClientError::SessionNotFound);
        }
        Ok(response.error_for_status()?)
    }

    /// Terminates an upstream session. Best-effort by contract: a 404 means
    /// the upstream already forgot the session, which is the desired end state.
    pub async fn delete_session(
        &self,
        config: &UpstreamConfig,
        session_id: &str,
    ) -> Result<(), UpstreamClientError> {
        let mut request = self
            .http
            .delete(config.base_url.clone())
            .header(MCP_SESSION_HEADER, session_id);
        if let Some(credential) = &config.credential {
            request = request.bearer_auth(credential);
        }
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }

    fn request(
        &self,
        config: &UpstreamConfig,
        session_id: Option<&str>,
        mesh: Option<&MeshBootstrap>,
        body: &JsonRpcRequest<'_>,
    ) -> reqwest::RequestBuilder {
        let mut request = self.http.post(config.base_url.clone()).json(body);
        if let Some(credential) = &config.credential {
            request = request.bearer_auth(credential);
        }
        if let Some(session_id) = session_id {
            request = request.header(MCP_SESSION_HEADER, session_id);
        }
        if let Some(mesh) = mesh {
            request = request
                .header(INIT_HOST_HEADER, &mesh.host)
                .header(ROUTING_KEY_HEADER, &mesh.key);
        }
        request
    }

    async fn send(
        &self,
        config: &UpstreamConfig,
        session_id: Option<&str>,
        mesh: Option<&MeshBootstrap>,
        body: &JsonRpcRequest<'_>,
    ) -> Result<RawResponse, UpstreamClientError> {
        let response = self.request(config, session_id, mesh, body).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(UpstreamClientError::SessionNotFound);
        }
        let session_id = response
            .headers()
            .get(MCP_SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let response = response.error_for_status()?;
        let body: JsonRpcResponse = response.json().await?;

        if let Some(error) = body.error {
            return Err(UpstreamClientError::RpcError {
                code: error.code,
                message: error.message,
            });
        }

        Ok(RawResponse { session_id, body })
    }
}

struct RawResponse {
    session_id: Option<String>,
    body: JsonRpcResponse,
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(base_url: &str, credential: Option<&str>) -> UpstreamConfig {
        UpstreamConfig {
            id: "up-1".to_string(),
            name: "weather".to_string(),
            base_url: base_url.parse().unwrap(),
            tool_prefix: String::new(),
            credential: credential.map(str::to_string),
            hostname: None,
            path: None,
        }
    }

    #[tokio::test]
    async fn initialize_reads_session_id_from_response_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("mcp-session-id", "sess-123")
                    .set_body_json(json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "result": {
                            "protocolVersion": "2025-03-26",
                            "capabilities": {"tools": {"listChanged": true}},
                            "serverInfo": {"name": "weather-upstream"},
                        },
                    })),
            )
            .mount(&server)
            .await;

        let client = UpstreamClient::new(reqwest::Client::new());
        let outcome = client
            .initialize(&config(&server.uri(), None), None)
            .await
            .unwrap();

        assert_eq!(outcome.session_id, "sess-123");
        assert_eq!(outcome.protocol_version, "2025-03-26");
        assert_eq!(outcome.server_name.as_deref(), Some("weather-upstream"));
        assert!(outcome.supports_tools());
        assert!(outcome.protocol_supported());
    }

    #[tokio::test]
    async fn initialize_without_session_header_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {},
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(reqwest::Client::new());
        let err = client
            .initialize(&config(&server.uri(), None), None)
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamClientError::MalformedResponse));
    }

    #[tokio::test]
    async fn initialize_with_mesh_bootstrap_sends_routing_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header(INIT_HOST_HEADER, "weather.svc.cluster.local"))
            .and(header(ROUTING_KEY_HEADER, "shared-secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("mcp-session-id", "sess-mesh")
                    .set_body_json(json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "result": {"protocolVersion": "2025-03-26", "capabilities": {"tools": {}}},
                    })),
            )
            .mount(&server)
            .await;

        let client = UpstreamClient::new(reqwest::Client::new());
        let mesh = MeshBootstrap {
            host: "weather.svc.cluster.local".to_string(),
            key: "shared-secret".to_string(),
        };
        let outcome = client
            .initialize(&config(&server.uri(), None), Some(&mesh))
            .await
            .unwrap();

        assert_eq!(outcome.session_id, "sess-mesh");
    }

    #[tokio::test]
    async fn list_tools_sends_session_header_and_bearer_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("mcp-session-id", "sess-123"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {"tools": [{"name": "get_forecast", "description": null}]},
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(reqwest::Client::new());
        let tools = client
            .list_tools(&config(&server.uri(), Some("s3cret")), "sess-123")
            .await
            .unwrap();

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "get_forecast");
    }

    #[tokio::test]
    async fn session_not_found_maps_404_to_dedicated_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(reqwest::Client::new());
        let err = client
            .list_tools(&config(&server.uri(), None), "stale-session")
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamClientError::SessionNotFound));
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn rpc_error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32000, "message": "upstream exploded"},
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(reqwest::Client::new());
        let err = client
            .initialize(&config(&server.uri(), None), None)
            .await
            .unwrap_err();

        match err {
            UpstreamClientError::RpcError { code, message } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("expected RpcError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_session_treats_404_as_already_gone() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(reqwest::Client::new());
        client
            .delete_session(&config(&server.uri(), None), "sess-old")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn notify_initialized_accepts_202_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(reqwest::Client::new());
        client
            .notify_initialized(&config(&server.uri(), None), "sess-123", None)
            .await
            .unwrap();
    }
}
