pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod stream_driver;
pub mod upstream;

pub use config::{GatewayConfig, GatewaySnapshot, GatewayStore, MemoryGatewayStore};
pub use handler::{CoreState, router};
pub use upstream::{HttpUpstreamClient, UpstreamClient, UpstreamClientConfig};
