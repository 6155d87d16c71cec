//! Relay server implementation

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use vstation_common::{ControlBus, StationBus, WS_PATH};

use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::display_proxy;

/// Relay server
#[derive(Clone)]
pub struct RelayServer {
    state: Arc<RelayState>,
}

struct RelayState {
    dispatcher: Dispatcher,
    max_message_bytes: usize,
}

/// Serve the relay with a live control-bus connection.
pub async fn serve(addr: SocketAddr, cfg: RelayConfig) -> anyhow::Result<()> {
    let bus = Arc::new(StationBus::from_config(&cfg.bus));
    RelayServer::new(bus, &cfg).serve(addr).await
}

impl RelayServer {
    /// Create a new relay server around the given control bus.
    pub fn new(bus: Arc<dyn ControlBus>, cfg: &RelayConfig) -> Self {
        Self {
            state: Arc::new(RelayState {
                dispatcher: Dispatcher::new(bus),
                max_message_bytes: cfg.limits.max_message_bytes,
            }),
        }
    }

    /// Create router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(health_handler))
            .route(WS_PATH, get(ws_handler))
            .route("/websockify/:name", get(display_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve until the process is stopped.
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("VStation relay listening on {}", addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn health_handler() -> &'static str {
    "VStation relay"
}

async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_control_socket(state, socket))
}

/// One control connection: decode each text message, dispatch it on its own
/// task, and funnel the correlated responses back through a single writer so
/// out-of-order completion is fine.
async fn handle_control_socket(state: Arc<RelayState>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(32);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let state = state.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = state.dispatcher.dispatch_raw(&text).await;
                    match serde_json::to_string(&response) {
                        Ok(encoded) => {
                            if tx.send(Message::Text(encoded)).await.is_err() {
                                debug!("Connection gone before response could be sent");
                            }
                        }
                        Err(e) => error!("Failed to encode response envelope: {}", e),
                    }
                });
            }
            Ok(Message::Binary(_)) => {
                warn!("Ignoring binary message on control channel");
            }
            Ok(Message::Close(_)) => {
                debug!("Control connection closed by client");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                debug!("Control connection error: {}", e);
                break;
            }
        }
    }

    drop(tx);
    let _ = writer.await;
}

async fn display_handler(
    State(state): State<Arc<RelayState>>,
    Path(name): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.dispatcher.display_target(&name).await {
        Some((host, port)) => ws.on_upgrade(move |socket| async move {
            if let Err(e) = display_proxy::bridge(socket, &host, port).await {
                error!("Display proxy error for {}: {}", name, e);
            }
        }),
        None => (StatusCode::NOT_FOUND, "No display provisioned for machine").into_response(),
    }
}
