//! Owns every registered Upstream Manager, aggregates their catalogs under the
//! configured tool prefixes, and detects name collisions. Grounded on the
//! reference stack's connection-manager fan-out shape (snapshot subscribers,
//! release the guard, then do the slow work) for the config-change broadcast.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};
use upstream::{Tool, ToolAnnotations, UpstreamConfig, UpstreamManager};

use crate::config::GatewayConfig;

/// One entry in the aggregated, gateway-prefixed tool catalog.
#[derive(Debug, Clone)]
pub struct AggregatedTool {
    pub gateway_name: String,
    pub upstream_id: String,
    /// The upstream's qualified name, the key allow-list claims use.
    pub upstream_name: String,
    pub original_name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
    pub annotations: ToolAnnotations,
}

struct Registered {
    manager: Arc<UpstreamManager>,
    stop_tx: broadcast::Sender<()>,
}

pub struct Registry {
    upstreams: RwLock<HashMap<String, Registered>>,
    virtual_servers: RwLock<Vec<crate::config::VirtualServer>>,
    http: reqwest::Client,
    probe_interval: Duration,
    config_tx: broadcast::Sender<GatewayConfig>,
    /// Fires whenever the aggregated catalog may have changed: a config diff
    /// took effect, or an Upstream Manager observed a tool-set change or
    /// crossed its failure threshold. Managers hold a clone of the sender.
    catalog_tx: broadcast::Sender<()>,
}

impl Registry {
    pub fn new(http: reqwest::Client, probe_interval: Duration) -> Arc<Self> {
        let (config_tx, _) = broadcast::channel(16);
        let (catalog_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            upstreams: RwLock::new(HashMap::new()),
            virtual_servers: RwLock::new(Vec::new()),
            http,
            probe_interval,
            config_tx,
            catalog_tx,
        })
    }

    pub fn subscribe_config(&self) -> broadcast::Receiver<GatewayConfig> {
        self.config_tx.subscribe()
    }

    pub fn subscribe_catalog_changes(&self) -> broadcast::Receiver<()> {
        self.catalog_tx.subscribe()
    }

    pub async fn get(&self, upstream_id: &str) -> Option<Arc<UpstreamManager>> {
        self.upstreams
            .read()
            .await
            .get(upstream_id)
            .map(|r| r.manager.clone())
    }

    pub async fn all(&self) -> Vec<Arc<UpstreamManager>> {
        self.upstreams
            .read()
            .await
            .values()
            .map(|r| r.manager.clone())
            .collect()
    }

    pub async fn virtual_servers(&self) -> Vec<crate::config::VirtualServer> {
        self.virtual_servers.read().await.clone()
    }

    /// Config snapshot of every live upstream, for observers that attach
    /// after a configuration has already been applied.
    pub async fn current_upstream_configs(&self) -> Vec<UpstreamConfig> {
        self.upstreams
            .read()
            .await
            .values()
            .map(|r| r.manager.config().clone())
            .collect()
    }

    /// Diffs `config` against the live registry: unregisters removed or
    /// rotated upstreams (stopping their managers), registers new ones, and
    /// replaces the virtual server list. Subscribers only hear about pushes
    /// that changed something; re-pushing the current document is a no-op.
    pub async fn apply_config(self: &Arc<Self>, config: GatewayConfig) {
        let desired = config.to_upstream_configs();
        let desired_by_id: HashMap<&str, &UpstreamConfig> =
            desired.iter().map(|c| (c.id.as_str(), c)).collect();
        let mut changed = false;

        {
            let mut upstreams = self.upstreams.write().await;

            // A config rotation (same id, new credential/hostname/path) is a
            // remove-then-register so the manager re-opens its connections.
            let stale: Vec<String> = upstreams
                .iter()
                .filter(|(id, registered)| {
                    desired_by_id
                        .get(id.as_str())
                        .is_none_or(|cfg| *cfg != registered.manager.config())
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                if let Some(registered) = upstreams.remove(&id) {
                    info!(upstream = %id, "unregistering upstream");
                    let _ = registered.stop_tx.send(());
                    changed = true;
                }
            }

            for entry in desired {
                if upstreams.contains_key(&entry.id) {
                    continue;
                }
                let (stop_tx, stop_rx) = broadcast::channel(1);
                let manager = UpstreamManager::new(
                    entry.clone(),
                    self.http.clone(),
                    self.probe_interval,
                    self.catalog_tx.clone(),
                );
                let task_manager = manager.clone();
                tokio::spawn(async move {
                    task_manager.run(stop_rx).await;
                });
                info!(upstream = %entry.id, "registered new upstream");
                upstreams.insert(entry.id.clone(), Registered { manager, stop_tx });
                changed = true;
            }
        }

        {
            let mut virtual_servers = self.virtual_servers.write().await;
            if *virtual_servers != config.virtual_servers {
                *virtual_servers = config.virtual_servers.clone();
                changed = true;
            }
        }

        if changed {
            if self.config_tx.send(config).is_err() {
                warn!("no config subscribers currently listening");
            }
            let _ = self.catalog_tx.send(());
        }
    }

    /// Union of every healthy upstream's tools, gateway-prefixed, with
    /// later-arriving name collisions rejected (first registration keeps the
    /// name; both sides are flagged as conflicted).
    pub async fn aggregated_catalog(&self) -> Vec<AggregatedTool> {
        let upstreams = self.upstreams.read().await;
        let mut seen_names: HashMap<String, String> = HashMap::new();
        let mut conflicts: HashMap<String, Vec<String>> = HashMap::new();
        let mut catalog = Vec::new();

        let mut ordered: Vec<_> = upstreams.values().map(|r| r.manager.clone()).collect();
        ordered.sort_by(|a, b| a.config().id.cmp(&b.config().id));

        for manager in &ordered {
            if !manager.is_valid() {
                continue;
            }
            let config = manager.config();
            for tool in manager.get_tools() {
                let gateway_name = config.prefixed_tool_name(&tool.name);
                if let Some(owner) = seen_names.get(&gateway_name) {
                    if owner != &config.id {
                        warn!(
                            tool = %gateway_name,
                            owner,
                            rejected = %config.id,
                            "tool name collision, later upstream rejected"
                        );
                        conflicts
                            .entry(owner.clone())
                            .or_default()
                            .push(gateway_name.clone());
                        conflicts
                            .entry(config.id.clone())
                            .or_default()
                            .push(gateway_name);
                        continue;
                    }
                }
                seen_names.insert(gateway_name.clone(), config.id.clone());
                catalog.push(tool_to_aggregated(config, &gateway_name, tool));
            }
        }

        for manager in &ordered {
            manager.set_conflicts(
                conflicts
                    .remove(&manager.config().id)
                    .unwrap_or_default(),
            );
        }

        catalog
    }

    pub async fn shutdown(&self) {
        for registered in self.upstreams.read().await.values() {
            let _ = registered.stop_tx.send(());
        }
    }

    /// Resolves a gateway-qualified tool name (as seen by downstream clients)
    /// back to the upstream that owns it and the tool's original, unprefixed
    /// name. Used by the Router's `tools/call` dispatch, which only ever sees
    /// the prefixed name on the wire. Collision policy matches the catalog:
    /// the first-registered upstream owns a contested name.
    pub async fn find_tool(&self, gateway_name: &str) -> Option<(Arc<UpstreamManager>, String)> {
        let entry = self
            .aggregated_catalog()
            .await
            .into_iter()
            .find(|t| t.gateway_name == gateway_name)?;
        let manager = self.get(&entry.upstream_id).await?;
        Some((manager, entry.original_name))
    }
}

fn tool_to_aggregated(config: &UpstreamConfig, gateway_name: &str, tool: Tool) -> AggregatedTool {
    AggregatedTool {
        gateway_name: gateway_name.to_string(),
        upstream_id: config.id.clone(),
        upstream_name: config.name.clone(),
        original_name: tool.name,
        description: tool.description,
        input_schema: tool.input_schema,
        annotations: tool.annotations,
    }
}
