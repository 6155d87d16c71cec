//! Request correlation.
//!
//! Assigns a unique id to every outgoing request and resolves the matching
//! continuation when a response with that id arrives. Ids are monotonic, so
//! they can never collide with an in-flight request. If the channel dies,
//! every outstanding continuation is rejected exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use vstation_common::{Error, Request, RequestEnvelope, ResponseEnvelope, Result};

type Continuation = oneshot::Sender<Result<ResponseEnvelope>>;

/// Correlates outgoing requests with incoming response envelopes.
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, Continuation>>,
    outbound: mpsc::UnboundedSender<String>,
    request_timeout: Option<Duration>,
}

impl Correlator {
    /// `outbound` feeds the channel's writer task; `request_timeout` arms an
    /// optional per-request deadline (off by default).
    pub fn new(outbound: mpsc::UnboundedSender<String>, request_timeout: Option<Duration>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound,
            request_timeout,
        }
    }

    /// Send one request and await its correlated response envelope.
    pub async fn send(&self, body: Request) -> Result<ResponseEnvelope> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        let envelope = RequestEnvelope::new(id.clone(), body);
        let encoded = serde_json::to_string(&envelope)?;
        if self.outbound.send(encoded).is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::ChannelClosed);
        }

        match self.request_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(received) => received.map_err(|_| Error::ChannelClosed)?,
                Err(_) => {
                    // Remove the entry so a late response is dropped as an
                    // unmatched id instead of resolving a dead continuation.
                    self.pending.lock().remove(&id);
                    Err(Error::Timeout {
                        seconds: deadline.as_secs(),
                    })
                }
            },
            None => rx.await.map_err(|_| Error::ChannelClosed)?,
        }
    }

    /// Route one inbound message to its waiting continuation. Messages with
    /// an unknown id are a protocol anomaly, logged and dropped.
    pub fn resolve(&self, text: &str) {
        let envelope: ResponseEnvelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                warn!("Undecodable response envelope: {}", e);
                return;
            }
        };

        match self.pending.lock().remove(&envelope.id) {
            Some(continuation) => {
                let _ = continuation.send(Ok(envelope));
            }
            None => warn!("Dropping response with unmatched id {}", envelope.id),
        }
    }

    /// Reject every outstanding request with a channel-closed error. Called
    /// when the underlying channel closes or errors.
    pub fn fail_all(&self) {
        let drained: Vec<Continuation> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for continuation in drained {
            let _ = continuation.send(Err(Error::ChannelClosed));
        }
    }

    /// Number of requests still awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }
}
