//! VStation CLI
//!
//! Operator client for the VStation relay: control channel, request
//! correlation, the connect session state machine, and display session
//! management.

pub mod channel;
pub mod commands;
pub mod correlator;
pub mod display;
pub mod output;
pub mod session;

pub use channel::{ChannelOptions, ControlChannel};
pub use display::{DisplayManager, EngineFactory};
pub use session::{Action, SessionDriver, SessionEvent, SessionState};
