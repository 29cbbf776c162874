use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::Tool;
use crate::client::{MeshBootstrap, UpstreamClient, UpstreamClientError};
use crate::config::UpstreamConfig;
use crate::sse::SseParser;

/// Consecutive runtime failures tolerated before the upstream's tools drop out
/// of the aggregated catalog. A single broken notification stream reconnects
/// without disturbing downstream clients.
const FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpstreamState {
    #[default]
    Disconnected,
    Connecting,
    Listening,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct UpstreamRecord {
    pub state: UpstreamState,
    pub tools: Vec<Tool>,
    pub protocol_version: Option<String>,
    pub capabilities: Vec<String>,
    pub reachable: bool,
    pub protocol_valid: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_validated: Option<DateTime<Utc>>,
    pub conflicts: Vec<String>,
}

impl UpstreamRecord {
    fn initial() -> Self {
        Self::default()
    }

    /// Whether this upstream's tools belong in the aggregated catalog. A
    /// reconnecting upstream keeps serving its last-known catalog until the
    /// failure threshold passes.
    pub fn is_valid(&self) -> bool {
        match self.state {
            UpstreamState::Listening => true,
            UpstreamState::Reconnecting => {
                self.protocol_valid && self.consecutive_failures < FAILURE_THRESHOLD
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Discovery {
    session_id: String,
    tools_changed: bool,
}

enum ListenOutcome {
    Shutdown,
    ConnectionLost(String),
}

/// Owns one upstream's discovery/listening lifecycle. Readers (Broker, Router)
/// take a lock-free snapshot via `snapshot()`; only the manager's own
/// background task ever writes through `record`.
pub struct UpstreamManager {
    config: UpstreamConfig,
    client: UpstreamClient,
    record: ArcSwap<UpstreamRecord>,
    probe_interval: Duration,
    catalog_tx: broadcast::Sender<()>,
}

impl UpstreamManager {
    pub fn new(
        config: UpstreamConfig,
        http: reqwest::Client,
        probe_interval: Duration,
        catalog_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            client: UpstreamClient::new(http),
            record: ArcSwap::from_pointee(UpstreamRecord::initial()),
            probe_interval,
            catalog_tx,
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<UpstreamRecord> {
        self.record.load_full()
    }

    pub fn get_tools(&self) -> Vec<Tool> {
        self.snapshot().tools.clone()
    }

    pub fn get_annotations(&self, tool_name: &str) -> Option<crate::catalog::ToolAnnotations> {
        self.snapshot()
            .tools
            .iter()
            .find(|t| t.name == tool_name)
            .map(|t| t.annotations)
    }

    pub fn is_valid(&self) -> bool {
        self.snapshot().is_valid()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.snapshot().protocol_version.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshot().last_error.clone()
    }

    /// Collision verdict pushed back by the Broker's aggregation pass: the
    /// gateway-qualified tool names this upstream lost to another registrant.
    pub fn set_conflicts(&self, conflicts: Vec<String>) {
        if self.snapshot().conflicts != conflicts {
            self.update(|record| record.conflicts = conflicts);
        }
    }

    fn update(&self, f: impl FnOnce(&mut UpstreamRecord)) {
        let mut next = (**self.record.load()).clone();
        f(&mut next);
        self.record.store(Arc::new(next));
    }

    fn transition(&self, state: UpstreamState) {
        info!(upstream = %self.config.name, ?state, "upstream state transition");
        self.update(|record| record.state = state);
    }

    fn notify_catalog_changed(&self) {
        let _ = self.catalog_tx.send(());
    }

    /// Performs initial discovery, then listens for upstream notifications
    /// (with periodic health probes) until `shutdown` fires. Intended to be
    /// spawned as one long-lived task per upstream.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = Backoff::default();

        loop {
            self.transition(UpstreamState::Connecting);

            match self.discover().await {
                Ok(discovery) => {
                    backoff.reset();
                    self.transition(UpstreamState::Listening);
                    if discovery.tools_changed {
                        self.notify_catalog_changed();
                    }
                    match self.listen(&discovery.session_id, &mut shutdown).await {
                        ListenOutcome::Shutdown => {
                            let _ = self
                                .client
                                .delete_session(&self.config, &discovery.session_id)
                                .await;
                            self.transition(UpstreamState::Closed);
                            return;
                        }
                        ListenOutcome::ConnectionLost(reason) => {
                            warn!(upstream = %self.config.name, reason, "upstream connection lost");
                            self.record_failure(reason, false);
                            self.transition(UpstreamState::Reconnecting);
                        }
                    }
                }
                Err(e) => {
                    warn!(upstream = %self.config.name, error = %e, "discovery failed");
                    // A protocol or capability mismatch still reached the
                    // upstream; only transport failures mean unreachable.
                    let reachable = !matches!(e, UpstreamClientError::Transport(_));
                    self.record_failure(e.to_string(), reachable);
                    self.transition(UpstreamState::Reconnecting);
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    self.transition(UpstreamState::Closed);
                    return;
                }
                _ = tokio::time::sleep(backoff.next_delay()) => {}
            }
        }
    }

    async fn discover(&self) -> Result<Discovery, UpstreamClientError> {
        let init = self.client.initialize(&self.config, None).await?;

        if !init.protocol_supported() {
            self.update(|record| {
                record.reachable = true;
                record.protocol_valid = false;
            });
            return Err(UpstreamClientError::UnsupportedProtocolVersion(
                init.protocol_version,
            ));
        }
        if !init.supports_tools() {
            self.update(|record| {
                record.reachable = true;
                record.protocol_valid = true;
            });
            return Err(UpstreamClientError::MissingToolsCapability);
        }

        self.client
            .notify_initialized(&self.config, &init.session_id, None)
            .await?;
        let tools = self.client.list_tools(&self.config, &init.session_id).await?;
        debug!(upstream = %self.config.name, tool_count = tools.len(), "discovery complete");

        let capabilities = match &init.capabilities {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };
        let tools_changed = self.snapshot().tools != tools;

        self.update(|record| {
            record.tools = tools;
            record.protocol_version = Some(init.protocol_version.clone());
            record.capabilities = capabilities;
            record.reachable = true;
            record.protocol_valid = true;
            record.consecutive_failures = 0;
            record.last_error = None;
            record.last_validated = Some(Utc::now());
        });

        Ok(Discovery {
            session_id: init.session_id,
            tools_changed,
        })
    }

    async fn listen(
        &self,
        session_id: &str,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ListenOutcome {
        let mut probe = tokio::time::interval(self.probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Skip);
        probe.tick().await;

        match self.client.open_listening_stream(&self.config, session_id).await {
            Ok(response) => {
                let mut chunks = response.bytes_stream();
                let mut parser = SseParser::default();
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => return ListenOutcome::Shutdown,
                        _ = probe.tick() => {
                            if let Err(e) = self.refresh_tools(session_id).await {
                                return ListenOutcome::ConnectionLost(e.to_string());
                            }
                        }
                        chunk = chunks.next() => match chunk {
                            Some(Ok(bytes)) => {
                                for event in parser.push(&bytes) {
                                    if is_tools_list_changed(&event.data) {
                                        debug!(upstream = %self.config.name, "upstream signalled tools/list_changed");
                                        if let Err(e) = self.refresh_tools(session_id).await {
                                            return ListenOutcome::ConnectionLost(e.to_string());
                                        }
                                    }
                                }
                            }
                            Some(Err(e)) => return ListenOutcome::ConnectionLost(e.to_string()),
                            None => return ListenOutcome::ConnectionLost("notification stream closed".to_string()),
                        }
                    }
                }
            }
            // Upstream without a GET notification stream: degrade to probing
            // on the same cadence, still on this session.
            Err(e) => {
                debug!(upstream = %self.config.name, error = %e, "no notification stream, polling instead");
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => return ListenOutcome::Shutdown,
                        _ = probe.tick() => {
                            if let Err(e) = self.refresh_tools(session_id).await {
                                return ListenOutcome::ConnectionLost(e.to_string());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Refetches `tools/list` on the discovery session and publishes a
    /// catalog-changed signal when the tool set differs.
    async fn refresh_tools(&self, session_id: &str) -> Result<(), UpstreamClientError> {
        let tools = self.client.list_tools(&self.config, session_id).await?;
        let changed = self.snapshot().tools != tools;
        self.update(|record| {
            record.tools = tools;
            record.reachable = true;
            record.consecutive_failures = 0;
            record.last_validated = Some(Utc::now());
        });
        if changed {
            info!(upstream = %self.config.name, "upstream tool set changed");
            self.notify_catalog_changed();
        }
        Ok(())
    }

    fn record_failure(&self, reason: String, reachable: bool) {
        let crossed_threshold = {
            let snapshot = self.snapshot();
            snapshot.consecutive_failures + 1 == FAILURE_THRESHOLD && !snapshot.tools.is_empty()
        };
        self.update(|record| {
            record.consecutive_failures += 1;
            record.reachable = reachable;
            record.last_error = Some(reason);
        });
        // Crossing the threshold drops this upstream's tools from the
        // aggregated catalog.
        if crossed_threshold {
            self.notify_catalog_changed();
        }
    }

    /// Opens a fresh upstream session for the lazy per-downstream bootstrap
    /// path, independent of the discovery session. The optional mesh headers
    /// let the call traverse the gateway's own proxy.
    pub async fn open_session(
        &self,
        mesh: Option<&MeshBootstrap>,
    ) -> Result<String, UpstreamClientError> {
        let init = self.client.initialize(&self.config, mesh).await?;
        self.client
            .notify_initialized(&self.config, &init.session_id, mesh)
            .await?;
        Ok(init.session_id)
    }

    /// Best-effort teardown of an upstream session opened via `open_session`.
    pub async fn close_session(&self, session_id: &str) {
        if let Err(e) = self.client.delete_session(&self.config, session_id).await {
            debug!(upstream = %self.config.name, error = %e, "upstream session delete failed");
        }
    }
}

fn is_tools_list_changed(data: &str) -> bool {
    serde_json::from_str::<Value>(data)
        .ok()
        .and_then(|v| v.get("method").and_then(Value::as_str).map(str::to_string))
        .is_some_and(|method| method == "notifications/tools/list_changed")
}

struct Backoff {
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { attempt: 0 }
    }
}

impl Backoff {
    const BASE: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(60);

    fn next_delay(&mut self) -> Duration {
        let exp = Self::BASE.saturating_mul(1u32 << self.attempt.min(6));
        self.attempt += 1;
        exp.min(Self::CAP)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}
