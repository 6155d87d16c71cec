//! Wire protocol between the operator client and the relay.
//!
//! One JSON object per WebSocket text message. Every request carries a
//! correlation `id` that the relay echoes back in exactly one response
//! envelope. Unknown fields are ignored on both sides so envelopes can grow
//! in later protocol revisions.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Hard ceiling for uploaded file contents: 128 MiB, inclusive.
pub const MAX_UPLOAD_BYTES: u64 = 0x800_0000;

/// A request envelope: correlation id plus the request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub id: String,
    #[serde(flatten)]
    pub body: Request,
}

impl RequestEnvelope {
    pub fn new(id: impl Into<String>, body: Request) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

/// The closed set of request kinds, tagged by the `request` field.
///
/// Adding a kind here forces every dispatcher match to be revisited at
/// compile time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "request", rename_all = "kebab-case")]
pub enum Request {
    /// Enumerate the machines known to the control bus.
    Machines,
    /// Start the named machine.
    Start { name: String },
    /// Provision a remote-display endpoint for the named machine.
    SetupDisplay { name: String },
    /// Push one file into the named machine's transfer drive.
    /// `contents` is base64-encoded.
    Upload {
        name: String,
        filename: String,
        contents: String,
    },
}

impl Request {
    /// The wire tag for this request kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Machines => "machines",
            Request::Start { .. } => "start",
            Request::SetupDisplay { .. } => "setup-display",
            Request::Upload { .. } => "upload",
        }
    }
}

/// All wire tags the relay recognizes. Used to tell an unknown kind apart
/// from a malformed request of a known kind.
pub const KNOWN_KINDS: &[&str] = &["machines", "start", "setup-display", "upload"];

/// A response envelope: correlation id, success discriminant, optional error
/// string, and a kind-specific payload flattened into the same object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl ResponseEnvelope {
    pub fn success(id: impl Into<String>, payload: ResponsePayload) -> Self {
        Self {
            id: id.into(),
            success: true,
            error: None,
            payload,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            error: Some(error.into()),
            payload: ResponsePayload::Empty {},
        }
    }

    /// Validate the success discriminant and extract the payload.
    pub fn into_result(self) -> std::result::Result<ResponsePayload, String> {
        if self.success {
            Ok(self.payload)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "unspecified error".to_string()))
        }
    }
}

/// Kind-specific response payloads. Untagged: the field names discriminate,
/// and an error (or bare start) response carries no payload fields at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResponsePayload {
    Machines { machines: Vec<MachineDescriptor> },
    Endpoint(DisplayEndpoint),
    Upload { filename: String },
    Empty {},
}

/// Immutable snapshot of one machine known to the control bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MachineDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Where a machine's remote framebuffer session can be reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(rename = "uploadEnabled", default)]
    pub upload_enabled: bool,
}

/// Reject upload sizes above the 128 MiB ceiling. Exactly 128 MiB passes.
pub fn validate_upload_size(size: u64) -> Result<()> {
    if size > MAX_UPLOAD_BYTES {
        Err(Error::UploadTooLarge { size })
    } else {
        Ok(())
    }
}

/// Encode raw file contents for the `upload` request.
pub fn encode_contents(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode the `contents` field of an `upload` request.
pub fn decode_contents(contents: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(contents)
        .map_err(|e| Error::Protocol(format!("Invalid upload contents encoding: {}", e)))
}
