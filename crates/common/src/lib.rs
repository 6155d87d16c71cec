//! VStation Common Library
//!
//! Shared wire-protocol types, error types, and the control-bus client used by
//! both the relay and the operator CLI.

pub mod bus;
pub mod error;
pub mod proto;

pub use bus::{BusConfig, ControlBus, StationBus};
pub use error::{Error, Result};
pub use proto::*;

/// VStation version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default relay port
pub const DEFAULT_PORT: u16 = 5962;

/// WebSocket path served by the relay
pub const WS_PATH: &str = "/ws";

/// Default control-bus socket path
pub fn default_bus_socket_path() -> std::path::PathBuf {
    std::path::PathBuf::from("/run/vstation/bus.sock")
}
