//! VStation Relay
//!
//! Bridges browser WebSocket connections to the host-side control bus:
//! decodes request envelopes, performs the matching bus call, and answers
//! with correlated success/failure envelopes. Also proxies display traffic
//! for provisioned endpoints.

pub mod config;
pub mod dispatch;
pub mod display_proxy;
pub mod server;

pub use config::RelayConfig;
pub use dispatch::Dispatcher;
pub use server::RelayServer;
