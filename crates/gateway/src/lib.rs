// switchboard-gateway: WebSocket relay between clients and a downstream processor

pub mod config;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod ws;

pub use config::GatewayConfig;
pub use registry::SessionRegistry;
pub use server::{serve, Gateway};
