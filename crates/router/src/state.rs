use std::sync::Arc;

use arc_swap::ArcSwap;
use broker::Registry;
use session::{SessionCache, SessionTokenManager};
use tracing::info;
use upstream::UpstreamConfig;

use crate::config::RouterConfig;

/// Everything the ext_proc service needs per request. Shared with the Broker
/// via the same `Arc<Registry>` instance (constructed once by the binary) —
/// the Router never mutates it, only reads snapshots.
pub struct RouterState {
    pub registry: Arc<Registry>,
    pub session_cache: Arc<SessionCache>,
    pub session_tokens: SessionTokenManager,
    pub config: RouterConfig,
    /// Hot-swappable copy of the current upstream list, used only to resolve
    /// an upstream's `(authority, path)` for header rewriting without taking
    /// the registry's lock on every request. Refreshed by `watch_config`.
    routing_table: ArcSwap<Vec<UpstreamConfig>>,
}

impl RouterState {
    pub fn new(
        registry: Arc<Registry>,
        session_cache: Arc<SessionCache>,
        session_tokens: SessionTokenManager,
        config: RouterConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            session_cache,
            session_tokens,
            config,
            routing_table: ArcSwap::from_pointee(Vec::new()),
        })
    }

    pub fn upstream_authority(&self, upstream_id: &str) -> Option<String> {
        self.routing_table
            .load()
            .iter()
            .find(|u| u.id == upstream_id)
            .and_then(|u| {
                u.hostname.clone().or_else(|| {
                    u.base_url.host_str().map(|h| match u.base_url.port() {
                        Some(p) => format!("{h}:{p}"),
                        None => h.to_string(),
                    })
                })
            })
    }

    pub fn upstream_path(&self, upstream_id: &str) -> Option<String> {
        self.routing_table
            .load()
            .iter()
            .find(|u| u.id == upstream_id)
            .map(|u| u.path.clone().unwrap_or_else(|| u.base_url.path().to_string()))
    }

    /// Runs for the lifetime of the process: keeps `routing_table` in sync
    /// with every configuration push the Broker's `Registry` observes, and
    /// purges cached upstream sessions for upstreams that dropped out.
    /// Subscribes before seeding from the registry's live state, so a config
    /// applied before this task started is still picked up.
    pub async fn watch_config(self: Arc<Self>) {
        let mut rx = self.registry.subscribe_config();
        let seed = self.registry.current_upstream_configs().await;
        if !seed.is_empty() {
            info!(upstreams = seed.len(), "router routing table seeded");
            self.routing_table.store(Arc::new(seed));
        }
        loop {
            match rx.recv().await {
                Ok(config) => {
                    let table = config.to_upstream_configs();
                    info!(upstreams = table.len(), "router routing table updated");
                    let previous = self.routing_table.swap(Arc::new(table));
                    for old in previous.iter() {
                        if !self.routing_table.load().iter().any(|u| u.id == old.id) {
                            self.session_cache.purge_upstream(&old.id);
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
