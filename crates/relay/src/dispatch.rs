//! Request dispatch.
//!
//! Turns one inbound WebSocket text message into exactly one correlated
//! response envelope. Every known request kind maps to exactly one control
//! bus call; bus failures are reported per-request and never crash the
//! relay.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use vstation_common::{
    decode_contents, ControlBus, Request, RequestEnvelope, ResponseEnvelope, ResponsePayload,
    KNOWN_KINDS, MAX_UPLOAD_BYTES,
};

/// Routes decoded request envelopes to control-bus calls and tracks the
/// display targets provisioned through it.
pub struct Dispatcher {
    bus: Arc<dyn ControlBus>,
    /// Display target registry: machine name -> (host, port)
    displays: RwLock<HashMap<String, (String, u16)>>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn ControlBus>) -> Self {
        Self {
            bus,
            displays: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a display target registered by a successful `setup-display`.
    pub async fn display_target(&self, name: &str) -> Option<(String, u16)> {
        self.displays.read().await.get(name).cloned()
    }

    /// Decode one raw message and dispatch it. Always produces a response
    /// envelope; malformed traffic gets a failure envelope with whatever id
    /// can be recovered.
    pub async fn dispatch_raw(&self, text: &str) -> ResponseEnvelope {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("Undecodable message: {}", e);
                return ResponseEnvelope::failure("", format!("Malformed request: {}", e));
            }
        };

        let id = match value.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        match serde_json::from_value::<RequestEnvelope>(value.clone()) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => {
                let kind = value
                    .get("request")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<missing>");
                if KNOWN_KINDS.contains(&kind) {
                    ResponseEnvelope::failure(id, format!("Invalid {} request: {}", kind, e))
                } else {
                    ResponseEnvelope::failure(id, format!("Unknown request {}", kind))
                }
            }
        }
    }

    /// Dispatch one decoded envelope: exactly one bus call per request.
    pub async fn dispatch(&self, envelope: RequestEnvelope) -> ResponseEnvelope {
        let RequestEnvelope { id, body } = envelope;
        debug!("Dispatching {} request (id {})", body.kind(), id);

        match body {
            Request::Machines => match self.bus.get_machines().await {
                Ok(machines) => {
                    ResponseEnvelope::success(id, ResponsePayload::Machines { machines })
                }
                Err(e) => ResponseEnvelope::failure(id, e.diagnostic()),
            },

            Request::Start { name } => match self.bus.start_machine(&name).await {
                Ok(()) => ResponseEnvelope::success(id, ResponsePayload::Empty {}),
                Err(e) => ResponseEnvelope::failure(id, e.diagnostic()),
            },

            Request::SetupDisplay { name } => {
                match self.bus.get_display_endpoint(&name).await {
                    Ok(endpoint) => {
                        let mut displays = self.displays.write().await;
                        displays.insert(name.clone(), (endpoint.host.clone(), endpoint.port));
                        debug!(
                            "Registered display target for {}: {}:{}",
                            name, endpoint.host, endpoint.port
                        );
                        ResponseEnvelope::success(id, ResponsePayload::Endpoint(endpoint))
                    }
                    Err(e) => ResponseEnvelope::failure(id, e.diagnostic()),
                }
            }

            Request::Upload {
                name,
                filename,
                contents,
            } => {
                let bytes = match decode_contents(&contents) {
                    Ok(bytes) => bytes,
                    Err(e) => return ResponseEnvelope::failure(id, e.diagnostic()),
                };
                // The client validates before sending; re-check at the trust
                // boundary.
                if bytes.len() as u64 > MAX_UPLOAD_BYTES {
                    return ResponseEnvelope::failure(
                        id,
                        "File exceeds maximum allowed size of 128 MiB",
                    );
                }
                match self.bus.upload_file(&name, &filename, &bytes).await {
                    Ok(stored) => {
                        ResponseEnvelope::success(id, ResponsePayload::Upload { filename: stored })
                    }
                    Err(e) => ResponseEnvelope::failure(id, e.diagnostic()),
                }
            }
        }
    }
}
