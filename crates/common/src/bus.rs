//! Control-bus client.
//!
//! The relay talks to the privileged station daemon over a Unix socket using
//! newline-delimited JSON: `{"method": M, "params": {...}}` answered by
//! `{"return": ...}` or `{"error": {"type": T, "text": X}}`. Every call has a
//! bounded timeout, and a failed call leaves the client ready to reconnect on
//! the next one so a transiently unavailable bus never takes the relay down.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::proto::{encode_contents, DisplayEndpoint, MachineDescriptor};

/// Control-bus configuration, embedded in the relay config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Station daemon socket path
    pub socket_path: PathBuf,

    /// Per-call timeout in seconds
    pub call_timeout_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            socket_path: crate::default_bus_socket_path(),
            call_timeout_secs: 30,
        }
    }
}

/// The remote procedures the relay needs from the station daemon.
///
/// A trait seam so the dispatcher can be exercised against a mock bus.
#[async_trait]
pub trait ControlBus: Send + Sync {
    async fn get_machines(&self) -> Result<Vec<MachineDescriptor>>;
    async fn start_machine(&self, name: &str) -> Result<()>;
    async fn get_display_endpoint(&self, name: &str) -> Result<DisplayEndpoint>;
    /// Returns the filename the transfer drive stored the file under, which
    /// may differ from the requested one on collision.
    async fn upload_file(&self, name: &str, filename: &str, contents: &[u8]) -> Result<String>;
}

/// Unix-socket client for the station daemon (does not connect until the
/// first call; reconnects lazily after any failure).
pub struct StationBus {
    socket_path: PathBuf,
    call_timeout: Duration,
    stream: Mutex<Option<BufReader<UnixStream>>>,
}

impl StationBus {
    pub fn new(socket_path: impl AsRef<Path>, call_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            call_timeout,
            stream: Mutex::new(None),
        }
    }

    pub fn from_config(cfg: &BusConfig) -> Self {
        Self::new(&cfg.socket_path, Duration::from_secs(cfg.call_timeout_secs))
    }

    /// Execute one remote procedure with the configured timeout.
    pub async fn call<A: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<A>,
    ) -> Result<R> {
        let reply: BusReply<R> = self.exchange_timed(method, params).await?;
        reply
            .result
            .ok_or_else(|| Error::BusProtocol("Bus reply carried no return value".to_string()))
    }

    /// Execute a remote procedure whose return value is irrelevant or null.
    pub async fn call_void<A: Serialize>(&self, method: &str, params: Option<A>) -> Result<()> {
        let _: BusReply<serde_json::Value> = self.exchange_timed(method, params).await?;
        Ok(())
    }

    async fn exchange_timed<A: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<A>,
    ) -> Result<BusReply<R>> {
        match tokio::time::timeout(self.call_timeout, self.exchange(method, params)).await {
            Ok(result) => result,
            Err(_) => {
                // The stream may be mid-reply; force a reconnect next call.
                *self.stream.lock().await = None;
                Err(Error::Timeout {
                    seconds: self.call_timeout.as_secs(),
                })
            }
        }
    }

    async fn exchange<A: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<A>,
    ) -> Result<BusReply<R>> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
                Error::BusProtocol(format!(
                    "Failed to connect to {}: {}",
                    self.socket_path.display(),
                    e
                ))
            })?;
            debug!("Connected to control bus: {}", self.socket_path.display());
            *guard = Some(BufReader::new(stream));
        }

        let reader = guard.as_mut().unwrap();

        let call = BusCall { method, params };
        let call_str = serde_json::to_string(&call)?;
        trace!("Bus call: {}", call_str);

        let io_result: std::io::Result<String> = async {
            let writer = reader.get_mut();
            writer.write_all(call_str.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;

            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "bus closed the connection",
                ));
            }
            Ok(line)
        }
        .await;

        let line = match io_result {
            Ok(line) => line,
            Err(e) => {
                // Drop the broken stream so the next call reconnects.
                *guard = None;
                return Err(Error::BusProtocol(format!("Bus call failed: {}", e)));
            }
        };

        trace!("Bus reply: {}", line.trim());

        let reply: BusReply<R> = serde_json::from_str(&line)
            .map_err(|e| Error::BusProtocol(format!("Invalid bus reply: {}", e)))?;

        if let Some(error) = reply.error {
            return Err(Error::Bus {
                kind: error.kind,
                text: error.text,
            });
        }

        Ok(reply)
    }
}

#[async_trait]
impl ControlBus for StationBus {
    async fn get_machines(&self) -> Result<Vec<MachineDescriptor>> {
        self.call("GetMachines", None::<()>).await
    }

    async fn start_machine(&self, name: &str) -> Result<()> {
        self.call_void("StartMachine", Some(NameArgs { name })).await
    }

    async fn get_display_endpoint(&self, name: &str) -> Result<DisplayEndpoint> {
        let ep: BusEndpoint = self
            .call("GetDisplayEndpoint", Some(NameArgs { name }))
            .await?;
        Ok(DisplayEndpoint {
            host: ep.host,
            port: ep.port,
            upload_enabled: ep.upload,
        })
    }

    async fn upload_file(&self, name: &str, filename: &str, contents: &[u8]) -> Result<String> {
        let stored: StoredFile = self
            .call(
                "UploadFile",
                Some(UploadArgs {
                    name,
                    filename,
                    contents: encode_contents(contents),
                }),
            )
            .await?;
        Ok(stored.filename)
    }
}

// Bus wire types

#[derive(Debug, Serialize)]
struct BusCall<'a, A> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<A>,
}

#[derive(Debug, Deserialize)]
struct BusReply<T> {
    #[serde(rename = "return")]
    result: Option<T>,
    error: Option<BusErrorBody>,
}

#[derive(Debug, Deserialize)]
struct BusErrorBody {
    #[serde(rename = "type")]
    kind: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct NameArgs<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct UploadArgs<'a> {
    name: &'a str,
    filename: &'a str,
    contents: String,
}

#[derive(Debug, Deserialize)]
struct BusEndpoint {
    host: String,
    port: u16,
    #[serde(default)]
    upload: bool,
}

#[derive(Debug, Deserialize)]
struct StoredFile {
    filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[test]
    fn test_bus_call_serialization() {
        let call = BusCall {
            method: "StartMachine",
            params: Some(NameArgs { name: "vm1" }),
        };
        let json = serde_json::to_string(&call).unwrap();
        assert!(json.contains("\"method\":\"StartMachine\""));
        assert!(json.contains("\"name\":\"vm1\""));

        let call = BusCall {
            method: "GetMachines",
            params: None::<()>,
        };
        let json = serde_json::to_string(&call).unwrap();
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_bus_reply_parsing() {
        let reply: BusReply<Vec<MachineDescriptor>> =
            serde_json::from_str(r#"{"return":[{"name":"vm1"}]}"#).unwrap();
        assert_eq!(reply.result.unwrap()[0].name, "vm1");

        let reply: BusReply<serde_json::Value> = serde_json::from_str(
            r#"{"error":{"type":"org.freedesktop.DBus.Error.NoSuchMachine","text":"not found"}}"#,
        )
        .unwrap();
        let err = reply.error.unwrap();
        assert_eq!(err.kind, "org.freedesktop.DBus.Error.NoSuchMachine");
        assert_eq!(err.text, "not found");
    }

    /// Canned station daemon: answers each call on a single connection.
    async fn spawn_fake_daemon(listener: UnixListener) {
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut reader = BufReader::new(stream);
                    let mut line = String::new();
                    loop {
                        line.clear();
                        match reader.read_line(&mut line).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                        let call: serde_json::Value = serde_json::from_str(&line).unwrap();
                        let method = call["method"].as_str().unwrap_or_default();
                        let reply = match method {
                            "GetMachines" => {
                                r#"{"return":[{"name":"vm1"},{"name":"vm2","description":"test rig"}]}"#.to_string()
                            }
                            "StartMachine" if call["params"]["name"] == "missing" => {
                                r#"{"error":{"type":"org.freedesktop.DBus.Error.NoSuchMachine","text":"not found"}}"#.to_string()
                            }
                            "StartMachine" => r#"{"return":null}"#.to_string(),
                            "GetDisplayEndpoint" => {
                                r#"{"return":{"host":"127.0.0.1","port":5900,"upload":true}}"#.to_string()
                            }
                            "UploadFile" => format!(
                                r#"{{"return":{{"filename":"{}.0"}}}}"#,
                                call["params"]["filename"].as_str().unwrap()
                            ),
                            "Hang" => {
                                tokio::time::sleep(Duration::from_secs(60)).await;
                                continue;
                            }
                            _ => format!(
                                r#"{{"error":{{"type":"UnknownMethod","text":"no method {}"}}}}"#,
                                method
                            ),
                        };
                        let writer = reader.get_mut();
                        if writer.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                        let _ = writer.write_all(b"\n").await;
                    }
                });
            }
        });
    }

    #[tokio::test]
    async fn test_station_bus_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");
        spawn_fake_daemon(UnixListener::bind(&path).unwrap()).await;

        let bus = StationBus::new(&path, Duration::from_secs(5));

        let machines = bus.get_machines().await.unwrap();
        assert_eq!(machines.len(), 2);
        assert_eq!(machines[1].description.as_deref(), Some("test rig"));

        bus.start_machine("vm1").await.unwrap();

        let ep = bus.get_display_endpoint("vm1").await.unwrap();
        assert_eq!(ep.port, 5900);
        assert!(ep.upload_enabled);

        let stored = bus.upload_file("vm1", "disk.img", b"data").await.unwrap();
        assert_eq!(stored, "disk.img.0");
    }

    #[tokio::test]
    async fn test_station_bus_structured_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");
        spawn_fake_daemon(UnixListener::bind(&path).unwrap()).await;

        let bus = StationBus::new(&path, Duration::from_secs(5));
        let err = bus.start_machine("missing").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "org.freedesktop.DBus.Error.NoSuchMachine: not found"
        );
    }

    #[tokio::test]
    async fn test_station_bus_call_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");
        spawn_fake_daemon(UnixListener::bind(&path).unwrap()).await;

        let bus = StationBus::new(&path, Duration::from_millis(100));
        let err = bus
            .call::<_, serde_json::Value>("Hang", None::<()>)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        // The client recovers on the next call.
        let bus = StationBus::new(&path, Duration::from_secs(5));
        assert!(bus.get_machines().await.is_ok());
    }

    #[tokio::test]
    async fn test_station_bus_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let bus = StationBus::new(dir.path().join("absent.sock"), Duration::from_secs(1));
        let err = bus.get_machines().await.unwrap_err();
        assert!(err.to_string().contains("Failed to connect"));
    }
}
