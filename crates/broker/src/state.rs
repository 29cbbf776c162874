use std::sync::Arc;

use session::{SessionCache, SessionTokenManager};

use crate::registry::Registry;

#[derive(Debug, Clone)]
pub struct OAuthMetadataConfig {
    pub resource_name: Option<String>,
    pub resource: Option<String>,
    pub authorization_servers: Vec<String>,
    pub bearer_methods_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
}

impl Default for OAuthMetadataConfig {
    fn default() -> Self {
        Self {
            resource_name: None,
            resource: None,
            authorization_servers: Vec::new(),
            bearer_methods_supported: vec!["header".to_string()],
            scopes_supported: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub enforce_tool_filter: bool,
    pub allowlist_public_key_pem: Option<String>,
    pub config_push_bearer_token: Option<String>,
    pub oauth: OAuthMetadataConfig,
}

pub struct AppState {
    pub registry: Arc<Registry>,
    /// Shared with the Router: the Broker only touches it on explicit client
    /// teardown (`DELETE /mcp`).
    pub session_cache: Arc<SessionCache>,
    pub session_tokens: SessionTokenManager,
    pub options: BrokerOptions,
}
