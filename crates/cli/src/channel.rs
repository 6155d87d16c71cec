//! Control channel.
//!
//! A WebSocket connection to the relay carrying correlated request/response
//! envelopes. Only one control channel is meant to be live per session;
//! dropping a channel (or opening a replacement) rejects its in-flight
//! requests.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use vstation_common::{Error, Request, ResponseEnvelope, ResponsePayload, Result, WS_PATH};

use crate::correlator::Correlator;

/// Options governing how control channels are opened.
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    /// Use `wss://` instead of `ws://`. Matches the secure context of the
    /// embedding page in the browser client.
    pub secure: bool,

    /// Optional per-request deadline.
    pub request_timeout: Option<Duration>,
}

/// An open control channel to the relay.
pub struct ControlChannel {
    url: String,
    correlator: Arc<Correlator>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ControlChannel {
    /// Open a control channel to `address:port`. A transport failure is a
    /// rejected result, never silently swallowed.
    pub async fn open(address: &str, port: u16, options: &ChannelOptions) -> Result<Self> {
        let scheme = if options.secure { "wss" } else { "ws" };
        let url = format!("{}://{}:{}{}", scheme, address, port, WS_PATH);
        debug!("Opening control channel to {}", url);

        let (socket, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| Error::Channel(format!("Failed to open {}: {}", url, e)))?;

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let correlator = Arc::new(Correlator::new(outbound, options.request_timeout));

        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                trace!("-> {}", text);
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            trace!("<- {}", text);
                            correlator.resolve(&text);
                        }
                        Ok(Message::Close(_)) => {
                            debug!("Control channel closed by relay");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            debug!("Control channel error: {}", e);
                            break;
                        }
                    }
                }
                // Whatever ended the stream, nothing pending can complete now.
                correlator.fail_all();
            })
        };

        Ok(Self {
            url,
            correlator,
            reader,
            writer,
        })
    }

    /// The URL this channel is connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request and await the raw correlated envelope.
    pub async fn send_request(&self, body: Request) -> Result<ResponseEnvelope> {
        self.correlator.send(body).await
    }

    /// Send one request, validate the success discriminant, and return the
    /// payload. A failure envelope becomes `Error::Request`.
    pub async fn request(&self, body: Request) -> Result<ResponsePayload> {
        self.send_request(body)
            .await?
            .into_result()
            .map_err(Error::Request)
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
        self.correlator.fail_all();
    }
}
