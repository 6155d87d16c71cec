//! Error types for VStation

use thiserror::Error;

/// Result type alias using VStation Error
pub type Result<T> = std::result::Result<T, Error>;

/// VStation error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Structured failure reported by the control bus, rendered as "type: text"
    /// so it can be surfaced verbatim in a failure envelope.
    #[error("{kind}: {text}")]
    Bus { kind: String, text: String },

    #[error("Bus protocol error: {0}")]
    BusProtocol(String),

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Channel closed before a response arrived")]
    ChannelClosed,

    /// A correlated response arrived with `success: false`.
    #[error("{0}")]
    Request(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("File exceeds maximum allowed size of 128 MiB")]
    UploadTooLarge { size: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Human-readable diagnostic suitable for a wire failure envelope.
    pub fn diagnostic(&self) -> String {
        self.to_string()
    }
}
