pub mod app;
pub mod config;
pub mod config_endpoint;
pub mod filter;
pub mod mcp;
pub mod notify;
pub mod oauth;
pub mod registry;
pub mod state;
pub mod status;

pub use app::build_router;
pub use config::GatewayConfig;
pub use registry::Registry;
pub use state::{AppState, BrokerOptions, OAuthMetadataConfig};

#[cfg(test)]
mod test;
