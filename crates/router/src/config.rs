/// Static routing configuration: the gateway's own hostname (what `:authority`
/// gets rewritten to for ordinary requests) and the bootstrap secret used for
/// the `mcp-init-host`/`routing-key` self-call trick. The per-call HTTP
/// timeout applied to outbound upstream calls lives on the shared
/// `reqwest::Client` the binary builds once, not here.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub broker_authority: String,
    pub routing_key: String,
}

impl RouterConfig {
    pub fn new(broker_authority: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            broker_authority: broker_authority.into(),
            routing_key: routing_key.into(),
        }
    }
}
