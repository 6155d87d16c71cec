//! Display WebSocket proxy
//!
//! Bridges a browser WebSocket to a machine's remote-framebuffer TCP port.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, trace};

/// Bridge one upgraded WebSocket to the display server at `host:port`.
/// Returns when either side closes.
pub async fn bridge(socket: WebSocket, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    debug!("Connecting to display server at {}", addr);

    let stream = TcpStream::connect(&addr).await.map_err(|e| {
        error!("Failed to reach display server {}: {}", addr, e);
        anyhow::anyhow!("Display connection failed: {}", e)
    })?;

    let (mut tcp_read, mut tcp_write) = stream.into_split();
    let (mut ws_write, mut ws_read) = socket.split();

    let to_display = async {
        while let Some(msg) = ws_read.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    trace!("ws->display: {} bytes", data.len());
                    tcp_write.write_all(&data).await?;
                }
                Ok(Message::Text(text)) => {
                    // Some clients send the RFB version banner as text.
                    tcp_write.write_all(text.as_bytes()).await?;
                }
                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed by client");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    debug!("WebSocket read error: {}", e);
                    break;
                }
            }
        }
        anyhow::Ok(())
    };

    let to_browser = async {
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let n = tcp_read.read(&mut buffer).await?;
            if n == 0 {
                debug!("Display server closed connection");
                break;
            }
            trace!("display->ws: {} bytes", n);
            ws_write.send(Message::Binary(buffer[..n].to_vec())).await?;
        }
        let _ = ws_write.close().await;
        anyhow::Ok(())
    };

    tokio::select! {
        result = to_display => {
            if let Err(e) = result {
                debug!("ws->display forwarding ended: {}", e);
            }
        }
        result = to_browser => {
            if let Err(e) = result {
                debug!("display->ws forwarding ended: {}", e);
            }
        }
    }

    debug!("Display proxy session ended");
    Ok(())
}
