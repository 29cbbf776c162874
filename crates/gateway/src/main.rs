//! Boots the Broker's axum HTTP server and the Router's tonic ext_proc gRPC
//! server side by side under one shutdown signal, in the reference stack's
//! single-bundling-function shape (`soma-api-server::factory::create_api_service`)
//! scaled down to two servers sharing a `Registry` and a `SessionTokenManager`
//! instead of one service owning several repositories.

use std::sync::Arc;

use broker::{AppState, BrokerOptions, Registry};
use gateway::config::ProcessConfig;
use gateway_proto::ext_proc::external_processor_server::ExternalProcessorServer;
use router::{RouterConfig, RouterService, RouterState};
use session::{SessionCache, SessionTokenManager};
use shared::error::GatewayError;
use tokio::sync::broadcast;
use tracing::{error, info};

async fn load_startup_config(path: &std::path::Path) -> Result<broker::GatewayConfig, GatewayError> {
    let bytes = tokio::fs::read(path).await?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        broker::GatewayConfig::from_yaml(&bytes)
    } else {
        broker::GatewayConfig::from_json(&bytes)
    }
    .map_err(|e| GatewayError::InvalidRequest {
        msg: e.to_string(),
        source: None,
    })
}

async fn shutdown_signal(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shared::env::configure_env()?;
    shared::logging::configure_logging()?;

    let process_config = ProcessConfig::from_env()?;

    let http = reqwest::Client::builder()
        .timeout(process_config.call_timeout)
        .build()?;
    let registry = Registry::new(http, process_config.probe_interval);

    if let Some(path) = &process_config.startup_config_path {
        info!(path = %path.display(), "loading startup configuration");
        let config = load_startup_config(path).await?;
        registry.apply_config(config).await;
    }

    let session_tokens = SessionTokenManager::new(
        process_config.session_token_secret.clone(),
        process_config.session_token_ttl,
    );
    let session_cache = Arc::new(SessionCache::new());

    let broker_state = Arc::new(AppState {
        registry: registry.clone(),
        session_cache: session_cache.clone(),
        session_tokens: session_tokens.clone(),
        options: BrokerOptions {
            enforce_tool_filter: process_config.enforce_tool_filter,
            allowlist_public_key_pem: process_config.allowlist_public_key_pem.clone(),
            config_push_bearer_token: process_config.config_push_bearer_token.clone(),
            oauth: process_config.oauth.clone(),
        },
    });
    let broker_router = broker::build_router(broker_state);

    let router_state = RouterState::new(
        registry.clone(),
        session_cache,
        session_tokens,
        RouterConfig::new(process_config.broker_authority.clone(), process_config.routing_key.clone()),
    );
    tokio::spawn(router_state.clone().watch_config());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let broker_listener = tokio::net::TcpListener::bind(process_config.broker_bind_addr).await?;
    info!(addr = %process_config.broker_bind_addr, "broker listening");
    let broker_shutdown_rx = shutdown_tx.subscribe();
    let broker_task = tokio::spawn(async move {
        axum::serve(broker_listener, broker_router)
            .with_graceful_shutdown(shutdown_signal(broker_shutdown_rx))
            .await
    });

    info!(addr = %process_config.router_bind_addr, "router listening");
    let router_shutdown_rx = shutdown_tx.subscribe();
    let router_task = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(ExternalProcessorServer::new(RouterService::new(router_state)))
            .serve_with_shutdown(process_config.router_bind_addr, shutdown_signal(router_shutdown_rx))
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    registry.shutdown().await;

    match broker_task.await {
        Ok(Err(e)) => error!(error = %e, "broker server exited with an error"),
        Err(e) => error!(error = %e, "broker server task panicked"),
        Ok(Ok(())) => info!("broker server stopped"),
    }
    match router_task.await {
        Ok(Err(e)) => error!(error = %e, "router server exited with an error"),
        Err(e) => error!(error = %e, "router server task panicked"),
        Ok(Ok(())) => info!("router server stopped"),
    }
    Ok(())
}
