//! Remote display session lifecycle.
//!
//! At most one display engine exists per manager. Replacing it always
//! disconnects the previous engine before the new one is created, and
//! dropping a session disconnects it, so engines cannot leak across
//! reconnects.

use std::process::{Child, Command};

use tracing::{debug, info, warn};

use vstation_common::{DisplayEndpoint, Error, Result};

/// A connected remote framebuffer engine. Implementations must make
/// `disconnect` idempotent.
pub trait DisplayEngine: Send {
    fn disconnect(&mut self);
}

/// Creates engines for display endpoint URLs. The events sink is consulted
/// synchronously while the engine connects, so a credentials prompt can
/// block the handshake.
pub trait EngineFactory: Send {
    fn create(
        &mut self,
        url: &str,
        events: &mut dyn DisplayEvents,
    ) -> Result<Box<dyn DisplayEngine>>;
}

/// Callbacks an engine raises during its lifetime.
///
/// `credentials_required` is synchronous: the engine blocks its own
/// connection handshake until a password (or `None` to abort) is returned.
pub trait DisplayEvents: Send {
    fn connected(&mut self) {}
    /// `clean` is false when the peer dropped the connection unexpectedly.
    fn disconnected(&mut self, _clean: bool) {}
    fn credentials_required(&mut self) -> Option<String> {
        None
    }
    fn desktop_name(&mut self, _name: &str) {}
}

/// An attached display. Disconnects its engine on drop.
pub struct DisplaySession {
    machine: String,
    url: String,
    engine: Box<dyn DisplayEngine>,
}

impl DisplaySession {
    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for DisplaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplaySession")
            .field("machine", &self.machine)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl Drop for DisplaySession {
    fn drop(&mut self) {
        debug!("Disconnecting display session for {}", self.machine);
        self.engine.disconnect();
    }
}

/// Holds the single active display session.
pub struct DisplayManager {
    factory: Box<dyn EngineFactory>,
    events: Box<dyn DisplayEvents>,
    active: Option<DisplaySession>,
}

impl DisplayManager {
    pub fn new(factory: Box<dyn EngineFactory>) -> Self {
        Self {
            factory,
            events: Box::new(LoggingEvents),
            active: None,
        }
    }

    pub fn with_events(mut self, events: Box<dyn DisplayEvents>) -> Self {
        self.events = events;
        self
    }

    /// Connect a display for `machine`, tearing down any existing session
    /// first. The old engine is fully disconnected before the new one is
    /// created.
    pub fn attach(&mut self, machine: &str, endpoint: &DisplayEndpoint) -> Result<&DisplaySession> {
        if let Some(previous) = self.active.take() {
            info!("Replacing display session for {}", previous.machine);
            drop(previous);
        }

        let url = format!("vnc://{}:{}", endpoint.host, endpoint.port);
        let engine = self.factory.create(&url, &mut *self.events)?;
        info!("Display attached for {} at {}", machine, url);

        Ok(self.active.insert(DisplaySession {
            machine: machine.to_string(),
            url,
            engine,
        }))
    }

    /// Tear down the active session, if any.
    pub fn detach(&mut self) {
        if let Some(session) = self.active.take() {
            info!("Detaching display session for {}", session.machine);
        }
    }

    pub fn active(&self) -> Option<&DisplaySession> {
        self.active.as_ref()
    }
}

/// Launches an external viewer process for each display URL.
pub struct ViewerFactory {
    command: String,
}

impl ViewerFactory {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl EngineFactory for ViewerFactory {
    fn create(
        &mut self,
        url: &str,
        events: &mut dyn DisplayEvents,
    ) -> Result<Box<dyn DisplayEngine>> {
        let child = Command::new(&self.command)
            .arg(url)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to launch viewer {}: {}", self.command, e)))?;
        debug!("Launched viewer {} (pid {})", self.command, child.id());
        events.connected();
        Ok(Box::new(ViewerEngine { child: Some(child) }))
    }
}

struct ViewerEngine {
    child: Option<Child>,
}

impl DisplayEngine for ViewerEngine {
    fn disconnect(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                // Viewer already exited on its own; distinguish a user
                // closing the window from a crash.
                if status.success() {
                    debug!("Viewer exited cleanly");
                } else {
                    warn!("Viewer exited unexpectedly: {}", status);
                }
            }
            Ok(None) => {
                if let Err(e) = child.kill() {
                    warn!("Failed to stop viewer: {}", e);
                }
                let _ = child.wait();
            }
            Err(e) => warn!("Failed to check viewer status: {}", e),
        }
    }
}

/// Engine that only logs. Used when no viewer command is configured; the
/// operator connects their own client to the printed URL.
pub struct NullEngineFactory;

impl EngineFactory for NullEngineFactory {
    fn create(
        &mut self,
        url: &str,
        events: &mut dyn DisplayEvents,
    ) -> Result<Box<dyn DisplayEngine>> {
        info!("Display ready at {}", url);
        events.connected();
        Ok(Box::new(NullEngine))
    }
}

struct NullEngine;

impl DisplayEngine for NullEngine {
    fn disconnect(&mut self) {}
}

/// Default events sink that reports lifecycle transitions in the log.
pub struct LoggingEvents;

impl DisplayEvents for LoggingEvents {
    fn connected(&mut self) {
        info!("Display connected");
    }

    fn disconnected(&mut self, clean: bool) {
        if clean {
            info!("Display disconnected");
        } else {
            warn!("Display connection lost unexpectedly");
        }
    }

    fn desktop_name(&mut self, name: &str) {
        info!("Remote desktop: {}", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn log(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    struct RecordingFactory {
        recorder: Recorder,
        counter: usize,
        fail: bool,
    }

    impl RecordingFactory {
        fn new(recorder: Recorder) -> Self {
            Self {
                recorder,
                counter: 0,
                fail: false,
            }
        }
    }

    impl EngineFactory for RecordingFactory {
        fn create(
            &mut self,
            _url: &str,
            events: &mut dyn DisplayEvents,
        ) -> Result<Box<dyn DisplayEngine>> {
            if self.fail {
                return Err(Error::Internal("engine refused".to_string()));
            }
            self.counter += 1;
            self.recorder.log(format!("create:{}", self.counter));
            events.connected();
            Ok(Box::new(RecordingEngine {
                recorder: self.recorder.clone(),
                id: self.counter,
            }))
        }
    }

    struct RecordingEngine {
        recorder: Recorder,
        id: usize,
    }

    impl DisplayEngine for RecordingEngine {
        fn disconnect(&mut self) {
            self.recorder.log(format!("disconnect:{}", self.id));
        }
    }

    fn endpoint(port: u16) -> DisplayEndpoint {
        DisplayEndpoint {
            host: "127.0.0.1".to_string(),
            port,
            upload_enabled: false,
        }
    }

    #[test]
    fn test_attach_builds_url_from_endpoint() {
        let recorder = Recorder::default();
        let mut manager = DisplayManager::new(Box::new(RecordingFactory::new(recorder)));

        let session = manager.attach("vm1", &endpoint(5900)).unwrap();
        assert_eq!(session.machine(), "vm1");
        assert_eq!(session.url(), "vnc://127.0.0.1:5900");
        assert!(manager.active().is_some());
    }

    #[test]
    fn test_replace_disconnects_previous_before_creating_next() {
        let recorder = Recorder::default();
        let mut manager =
            DisplayManager::new(Box::new(RecordingFactory::new(recorder.clone())));

        manager.attach("vm1", &endpoint(5900)).unwrap();
        manager.attach("vm2", &endpoint(5901)).unwrap();

        assert_eq!(
            recorder.events(),
            vec!["create:1", "disconnect:1", "create:2"]
        );
    }

    #[test]
    fn test_detach_disconnects_exactly_once() {
        let recorder = Recorder::default();
        let mut manager =
            DisplayManager::new(Box::new(RecordingFactory::new(recorder.clone())));

        manager.attach("vm1", &endpoint(5900)).unwrap();
        manager.detach();
        manager.detach();

        assert_eq!(recorder.events(), vec!["create:1", "disconnect:1"]);
        assert!(manager.active().is_none());
    }

    struct PromptEvents {
        recorder: Recorder,
        password: Option<String>,
    }

    impl DisplayEvents for PromptEvents {
        fn connected(&mut self) {
            self.recorder.log("connected");
        }

        fn credentials_required(&mut self) -> Option<String> {
            self.recorder.log("credentials");
            self.password.clone()
        }
    }

    struct AuthFactory {
        recorder: Recorder,
    }

    impl EngineFactory for AuthFactory {
        fn create(
            &mut self,
            _url: &str,
            events: &mut dyn DisplayEvents,
        ) -> Result<Box<dyn DisplayEngine>> {
            match events.credentials_required() {
                Some(_) => {
                    events.connected();
                    Ok(Box::new(RecordingEngine {
                        recorder: self.recorder.clone(),
                        id: 1,
                    }))
                }
                None => Err(Error::Internal("authentication cancelled".to_string())),
            }
        }
    }

    #[test]
    fn test_credentials_block_the_handshake() {
        let recorder = Recorder::default();
        let events = PromptEvents {
            recorder: recorder.clone(),
            password: Some("hunter2".to_string()),
        };
        let mut manager = DisplayManager::new(Box::new(AuthFactory {
            recorder: recorder.clone(),
        }))
        .with_events(Box::new(events));

        manager.attach("vm1", &endpoint(5900)).unwrap();
        assert_eq!(recorder.events(), vec!["credentials", "connected"]);
    }

    #[test]
    fn test_cancelled_credentials_fail_attach() {
        let recorder = Recorder::default();
        let events = PromptEvents {
            recorder: recorder.clone(),
            password: None,
        };
        let mut manager = DisplayManager::new(Box::new(AuthFactory {
            recorder: recorder.clone(),
        }))
        .with_events(Box::new(events));

        let err = manager.attach("vm1", &endpoint(5900)).unwrap_err();
        assert!(err.to_string().contains("authentication cancelled"));
        assert!(manager.active().is_none());
    }

    #[test]
    fn test_failed_create_leaves_no_session() {
        let recorder = Recorder::default();
        let mut factory = RecordingFactory::new(recorder.clone());
        factory.fail = true;
        let mut manager = DisplayManager::new(Box::new(factory));

        assert!(manager.attach("vm1", &endpoint(5900)).is_err());
        assert!(manager.active().is_none());
        assert!(recorder.events().is_empty());
    }
}
