pub mod config;
pub mod dispatch;
pub mod headers;
pub mod jsonrpc;
pub mod response;
pub mod service;
pub mod state;

pub use config::RouterConfig;
pub use service::RouterService;
pub use state::RouterState;
