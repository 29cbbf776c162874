use serde::{Deserialize, Serialize};
use upstream::UpstreamConfig;
use url::Url;

/// One upstream entry as carried in the configuration document. Maps
/// onto `upstream::UpstreamConfig` once a stable `id` has been assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    pub url: Url,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tool_prefix: String,
    #[serde(default)]
    pub credential: Option<CredentialRef>,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRef {
    #[serde(rename = "ref")]
    pub reference: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualServer {
    pub qualified_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub tools: Vec<String>,
}

/// The typed, validated in-memory form of the dynamic configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    #[serde(default)]
    pub virtual_servers: Vec<VirtualServer>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl GatewayConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigParseError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_yaml(bytes: &[u8]) -> Result<Self, ConfigParseError> {
        Ok(serde_yaml::from_slice(bytes)?)
    }

    /// Resolves each server entry's credential against the environment
    /// (`{reference}_{key}`, uppercased) into the flat bearer credential
    /// `upstream::UpstreamConfig` carries. There is no secret-manager
    /// integration in this gateway — only environment-sourced credentials.
    pub fn to_upstream_configs(&self) -> Vec<UpstreamConfig> {
        self.servers
            .iter()
            .filter(|s| s.enabled)
            .map(|entry| {
                let credential = entry.credential.as_ref().and_then(|c| {
                    let var = format!(
                        "{}_{}",
                        c.reference.to_uppercase(),
                        c.key.to_uppercase()
                    );
                    std::env::var(var).ok()
                });
                UpstreamConfig {
                    id: format!("{}:{}:{}", entry.name, entry.tool_prefix, entry.url),
                    name: entry.name.clone(),
                    base_url: entry.url.clone(),
                    tool_prefix: entry.tool_prefix.clone(),
                    credential,
                    hostname: entry.hostname.clone(),
                    path: entry.path.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_json_document() {
        let doc = br#"{"servers":[{"name":"a","url":"http://localhost:9000"}],"virtual_servers":[]}"#;
        let config = GatewayConfig::from_json(doc).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert!(config.servers[0].enabled);
    }

    #[test]
    fn parses_yaml_document() {
        let doc = b"servers:\n  - name: a\n    url: http://localhost:9000\nvirtual_servers: []\n";
        let config = GatewayConfig::from_yaml(doc).unwrap();
        assert_eq!(config.servers[0].name, "a");
    }
}
