use serde::{Deserialize, Serialize};
use url::Url;

/// One registered upstream MCP server, as carried in the dynamic configuration
/// document pushed to the Broker and the Router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Stable identifier, unique across the fleet (used as the Session Cache key).
    pub id: String,
    /// Qualified name exposed in status reports and `x-mcp-servername`.
    pub name: String,
    pub base_url: Url,
    /// Prefix prepended to every tool this upstream advertises.
    #[serde(default)]
    pub tool_prefix: String,
    /// Bearer credential attached to every outbound call to this upstream, if any.
    #[serde(default)]
    pub credential: Option<String>,
    /// Overrides the `:authority` the Router rewrites onto requests routed to
    /// this upstream; `base_url`'s host:port is used when absent.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Overrides the `:path` the Router rewrites onto requests routed to this
    /// upstream; `base_url`'s path is used when absent.
    #[serde(default)]
    pub path: Option<String>,
}

impl UpstreamConfig {
    pub fn prefixed_tool_name(&self, original_name: &str) -> String {
        format!("{}{}", self.tool_prefix, original_name)
    }
}
