//! CLI command implementations.

pub mod connect;
pub mod machines;
pub mod start;
pub mod upload;

use std::time::Duration;

use crate::channel::{ChannelOptions, ControlChannel};

use vstation_common::Result;

/// Connection flags shared by every command.
#[derive(Debug, Clone, clap::Args)]
pub struct StationArgs {
    /// Relay host
    #[arg(long, default_value = "127.0.0.1")]
    pub address: String,

    /// Relay port
    #[arg(long, default_value_t = vstation_common::DEFAULT_PORT)]
    pub port: u16,

    /// Use TLS (wss://) for the control channel
    #[arg(long)]
    pub secure: bool,

    /// Fail requests that receive no response within this many seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,
}

impl StationArgs {
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            secure: self.secure,
            request_timeout: self.request_timeout.map(Duration::from_secs),
        }
    }

    /// Open a control channel for a one-shot command.
    pub async fn open_channel(&self) -> Result<ControlChannel> {
        ControlChannel::open(&self.address, self.port, &self.channel_options()).await
    }
}
