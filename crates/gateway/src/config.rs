//! Process-level bootstrap: everything the binary needs before it can build
//! a `Registry`, a `SessionCache`, or either server. Mirrors the reference
//! stack's environment-variable-first configuration shape (`shared::env`
//! loads `.env`/`.env.secrets`; this module reads the resulting process
//! environment into a typed struct) rather than a config-file format of its
//! own.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;
use shared::error::GatewayError;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Everything read from the environment once at startup. Per-request
/// behavior is governed by `broker::GatewayConfig`, which can additionally
/// change at runtime via `/config`.
pub struct ProcessConfig {
    pub broker_bind_addr: SocketAddr,
    pub router_bind_addr: SocketAddr,
    /// `:authority` the Router rewrites inbound requests to when forwarding
    /// through the Broker (its own externally reachable host:port).
    pub broker_authority: String,
    pub session_token_secret: Vec<u8>,
    pub session_token_ttl: Duration,
    pub routing_key: String,
    pub allowlist_public_key_pem: Option<String>,
    pub enforce_tool_filter: bool,
    pub config_push_bearer_token: Option<String>,
    /// Applied to the one `reqwest::Client` shared by every Upstream Manager
    /// and the Router's lazy session bootstrap call.
    pub call_timeout: StdDuration,
    /// How often an idle Upstream Manager re-probes its upstream's tool list.
    pub probe_interval: StdDuration,
    /// The `.well-known/oauth-protected-resource` document, populated from
    /// the environment with per-field defaults.
    pub oauth: broker::OAuthMetadataConfig,
    /// Static startup document for standalone mode; absent when the
    /// gateway is expected to receive its first configuration via `/config`.
    pub startup_config_path: Option<PathBuf>,
}

impl ProcessConfig {
    pub fn from_env() -> Result<Self, GatewayError> {
        let broker_bind_addr = env_or("BROKER_BIND_ADDR", "0.0.0.0:8080").parse()?;
        let router_bind_addr = env_or("ROUTER_BIND_ADDR", "0.0.0.0:9090").parse()?;
        let broker_authority = env_or("BROKER_AUTHORITY", "127.0.0.1:8080");

        let session_token_secret = std::env::var("SESSION_TOKEN_SECRET")
            .map_err(|_| {
                GatewayError::InvalidRequest {
                    msg: "SESSION_TOKEN_SECRET must be set".to_string(),
                    source: None,
                }
            })?
            .into_bytes();

        let session_token_ttl_seconds: i64 = env_or("SESSION_TOKEN_TTL_SECONDS", "3600")
            .parse()
            .unwrap_or(3600);

        let routing_key = std::env::var("ROUTING_KEY_SECRET").map_err(|_| {
            GatewayError::InvalidRequest {
                msg: "ROUTING_KEY_SECRET must be set".to_string(),
                source: None,
            }
        })?;

        Ok(Self {
            broker_bind_addr,
            router_bind_addr,
            broker_authority,
            session_token_secret,
            session_token_ttl: Duration::seconds(session_token_ttl_seconds),
            routing_key,
            allowlist_public_key_pem: std::env::var("ALLOWLIST_PUBLIC_KEY_PEM").ok(),
            enforce_tool_filter: env_or("ENFORCE_TOOL_FILTER", "false") == "true",
            config_push_bearer_token: std::env::var("CONFIG_PUSH_BEARER_TOKEN").ok(),
            startup_config_path: std::env::var("GATEWAY_CONFIG_PATH").ok().map(PathBuf::from),
            call_timeout: StdDuration::from_millis(
                env_or("CALL_TIMEOUT_MS", "10000").parse().unwrap_or(10_000),
            ),
            probe_interval: StdDuration::from_secs(
                env_or("PROBE_INTERVAL_SECONDS", "60").parse().unwrap_or(60),
            ),
            oauth: oauth_from_env(),
        })
    }
}

fn oauth_from_env() -> broker::OAuthMetadataConfig {
    let list = |name: &str| -> Vec<String> {
        std::env::var(name)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    let defaults = broker::OAuthMetadataConfig::default();
    let bearer_methods = list("OAUTH_BEARER_METHODS_SUPPORTED");
    broker::OAuthMetadataConfig {
        resource_name: std::env::var("OAUTH_RESOURCE_NAME").ok(),
        resource: std::env::var("OAUTH_RESOURCE").ok(),
        authorization_servers: list("OAUTH_AUTHORIZATION_SERVERS"),
        bearer_methods_supported: if bearer_methods.is_empty() {
            defaults.bearer_methods_supported
        } else {
            bearer_methods
        },
        scopes_supported: list("OAUTH_SCOPES_SUPPORTED"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default_when_unset() {
        // Name chosen to never exist in any environment this runs in.
        assert_eq!(env_or("GATEWAY_TEST_UNSET_VAR", "fallback"), "fallback");
    }
}
