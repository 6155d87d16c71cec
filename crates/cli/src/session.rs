//! Connect session state machine.
//!
//! The ordered sequence connect -> list machines -> await selection ->
//! start -> provision display -> attach, expressed as a pure value type
//! stepped by events. Transitions never perform I/O themselves; each step
//! returns at most one `Action` for the driver to execute, which enforces
//! strict sequencing (no two transitions in flight at once).

use tracing::{debug, warn};

use vstation_common::{
    DisplayEndpoint, Error, MachineDescriptor, Request, ResponsePayload, Result,
};

use crate::channel::{ChannelOptions, ControlChannel};
use crate::display::DisplayManager;

/// Session states. `Error` is reachable from every in-flight step.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingMachineList,
    AwaitingMachineSelection { machines: Vec<MachineDescriptor> },
    Starting { name: String },
    ProvisioningDisplay { name: String },
    DisplayActive { name: String, endpoint: DisplayEndpoint },
    Error { message: String },
}

impl SessionState {
    /// True for the states a new connect attempt may start from.
    fn accepts_connect(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::DisplayActive { .. } | SessionState::Error { .. }
        )
    }
}

/// Events that drive the machine: user input plus resolved or rejected
/// responses from the control channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connect { address: String, port: u16 },
    ChannelOpened,
    ChannelFailed { message: String },
    MachinesListed { result: std::result::Result<Vec<MachineDescriptor>, String> },
    MachineSelected { name: String },
    StartCompleted { result: std::result::Result<(), String> },
    DisplayProvisioned { result: std::result::Result<DisplayEndpoint, String> },
    AttachFailed { message: String },
}

/// What the driver must do next after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenChannel { address: String, port: u16 },
    RequestMachineList,
    StartMachine { name: String },
    ProvisionDisplay { name: String },
    AttachDisplay { name: String, endpoint: DisplayEndpoint },
}

impl SessionState {
    /// Pure transition function. Events that do not fit the current state
    /// are ignored (duplicate clicks, stale responses).
    pub fn step(self, event: SessionEvent) -> (SessionState, Option<Action>) {
        match (self, event) {
            (state, SessionEvent::Connect { address, port }) if state.accepts_connect() => {
                if address.trim().is_empty() {
                    // Silently ignored, not an error.
                    (state, None)
                } else {
                    (
                        SessionState::Connecting,
                        Some(Action::OpenChannel { address, port }),
                    )
                }
            }

            (SessionState::Connecting, SessionEvent::ChannelOpened) => (
                SessionState::AwaitingMachineList,
                Some(Action::RequestMachineList),
            ),
            (SessionState::Connecting, SessionEvent::ChannelFailed { message }) => {
                (SessionState::Error { message }, None)
            }

            (SessionState::AwaitingMachineList, SessionEvent::MachinesListed { result }) => {
                match result {
                    Ok(machines) => (
                        SessionState::AwaitingMachineSelection { machines },
                        None,
                    ),
                    Err(message) => (SessionState::Error { message }, None),
                }
            }

            (
                SessionState::AwaitingMachineSelection { machines },
                SessionEvent::MachineSelected { name },
            ) => {
                if machines.iter().any(|m| m.name == name) {
                    (
                        SessionState::Starting { name: name.clone() },
                        Some(Action::StartMachine { name }),
                    )
                } else {
                    warn!("Ignoring selection of unlisted machine {}", name);
                    (SessionState::AwaitingMachineSelection { machines }, None)
                }
            }

            (SessionState::Starting { name }, SessionEvent::StartCompleted { result }) => {
                match result {
                    Ok(()) => (
                        SessionState::ProvisioningDisplay { name: name.clone() },
                        Some(Action::ProvisionDisplay { name }),
                    ),
                    Err(message) => (SessionState::Error { message }, None),
                }
            }

            (
                SessionState::ProvisioningDisplay { name },
                SessionEvent::DisplayProvisioned { result },
            ) => match result {
                Ok(endpoint) => (
                    SessionState::DisplayActive {
                        name: name.clone(),
                        endpoint: endpoint.clone(),
                    },
                    Some(Action::AttachDisplay { name, endpoint }),
                ),
                Err(message) => (SessionState::Error { message }, None),
            },

            (SessionState::DisplayActive { .. }, SessionEvent::AttachFailed { message }) => {
                (SessionState::Error { message }, None)
            }

            // Everything else is a no-op: selecting with nothing pending,
            // responses for steps the machine has already moved past, etc.
            (state, event) => {
                debug!("Ignoring {:?} in state {:?}", event, state);
                (state, None)
            }
        }
    }
}

/// Presents a machine list and returns the chosen name, or `None` to leave
/// the selection pending.
pub trait Selector {
    fn select(&mut self, machines: &[MachineDescriptor]) -> Option<String>;
}

/// Always picks the same machine. Used when the operator pre-selects one.
pub struct PresetSelector(pub String);

impl Selector for PresetSelector {
    fn select(&mut self, _machines: &[MachineDescriptor]) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Owns the channel and display manager and executes the machine's actions
/// sequentially. A new connect attempt replaces the channel, which rejects
/// the previous attempt's in-flight requests; the machine's no-op arms drop
/// anything that still arrives late.
pub struct SessionDriver {
    options: ChannelOptions,
    state: SessionState,
    channel: Option<ControlChannel>,
    display: DisplayManager,
}

impl SessionDriver {
    pub fn new(options: ChannelOptions, display: DisplayManager) -> Self {
        Self {
            options,
            state: SessionState::Idle,
            channel: None,
            display,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn display(&mut self) -> &mut DisplayManager {
        &mut self.display
    }

    pub fn channel(&self) -> Option<&ControlChannel> {
        self.channel.as_ref()
    }

    /// Run one full connect sequence until the machine blocks (terminal
    /// state, abandoned selection, or a no-op connect).
    pub async fn connect(
        &mut self,
        address: &str,
        port: u16,
        selector: &mut dyn Selector,
    ) -> Result<()> {
        let mut event = SessionEvent::Connect {
            address: address.to_string(),
            port,
        };

        loop {
            let state = std::mem::replace(&mut self.state, SessionState::Idle);
            let (state, action) = state.step(event);
            self.state = state;

            let Some(action) = action else {
                match &self.state {
                    SessionState::AwaitingMachineSelection { machines } => {
                        match selector.select(machines) {
                            Some(name) => {
                                event = SessionEvent::MachineSelected { name };
                                continue;
                            }
                            // Selection left pending; the session blocks here.
                            None => return Ok(()),
                        }
                    }
                    _ => return Ok(()),
                }
            };

            event = match self.perform(action).await {
                Some(event) => event,
                None => return Ok(()),
            };
        }
    }

    /// Execute one action and produce the event its outcome maps to.
    async fn perform(&mut self, action: Action) -> Option<SessionEvent> {
        match action {
            Action::OpenChannel { address, port } => {
                // Replacing the channel rejects the previous channel's
                // in-flight requests via its Drop.
                match ControlChannel::open(&address, port, &self.options).await {
                    Ok(channel) => {
                        self.channel = Some(channel);
                        Some(SessionEvent::ChannelOpened)
                    }
                    Err(e) => Some(SessionEvent::ChannelFailed {
                        message: e.to_string(),
                    }),
                }
            }

            Action::RequestMachineList => {
                let result = match self.request(Request::Machines).await {
                    Ok(ResponsePayload::Machines { machines }) => Ok(machines),
                    Ok(other) => Err(format!("Unexpected machine list payload: {:?}", other)),
                    Err(message) => Err(message),
                };
                Some(SessionEvent::MachinesListed { result })
            }

            Action::StartMachine { name } => {
                let result = self.request(Request::Start { name }).await.map(|_| ());
                Some(SessionEvent::StartCompleted { result })
            }

            Action::ProvisionDisplay { name } => {
                let result = match self.request(Request::SetupDisplay { name }).await {
                    Ok(ResponsePayload::Endpoint(endpoint)) => Ok(endpoint),
                    Ok(other) => Err(format!("Unexpected endpoint payload: {:?}", other)),
                    Err(message) => Err(message),
                };
                Some(SessionEvent::DisplayProvisioned { result })
            }

            Action::AttachDisplay { name, endpoint } => {
                match self.display.attach(&name, &endpoint) {
                    Ok(session) => {
                        debug!("Display session attached: {}", session.url());
                        None
                    }
                    Err(e) => Some(SessionEvent::AttachFailed {
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    async fn request(&self, body: Request) -> std::result::Result<ResponsePayload, String> {
        let Some(channel) = &self.channel else {
            return Err("No open control channel".to_string());
        };
        channel.request(body).await.map_err(|e| match e {
            Error::Request(message) => message,
            other => other.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machines() -> Vec<MachineDescriptor> {
        vec![MachineDescriptor::new("vm1"), MachineDescriptor::new("vm2")]
    }

    fn endpoint() -> DisplayEndpoint {
        DisplayEndpoint {
            host: "10.0.0.5".to_string(),
            port: 5900,
            upload_enabled: false,
        }
    }

    fn connect_event() -> SessionEvent {
        SessionEvent::Connect {
            address: "station.local".to_string(),
            port: 5962,
        }
    }

    #[test]
    fn test_happy_path() {
        let (state, action) = SessionState::Idle.step(connect_event());
        assert_eq!(state, SessionState::Connecting);
        assert_eq!(
            action,
            Some(Action::OpenChannel {
                address: "station.local".to_string(),
                port: 5962
            })
        );

        let (state, action) = state.step(SessionEvent::ChannelOpened);
        assert_eq!(state, SessionState::AwaitingMachineList);
        assert_eq!(action, Some(Action::RequestMachineList));

        let (state, action) = state.step(SessionEvent::MachinesListed {
            result: Ok(machines()),
        });
        assert_eq!(
            state,
            SessionState::AwaitingMachineSelection {
                machines: machines()
            }
        );
        assert_eq!(action, None);

        let (state, action) = state.step(SessionEvent::MachineSelected {
            name: "vm1".to_string(),
        });
        assert_eq!(
            state,
            SessionState::Starting {
                name: "vm1".to_string()
            }
        );
        assert_eq!(
            action,
            Some(Action::StartMachine {
                name: "vm1".to_string()
            })
        );

        let (state, action) = state.step(SessionEvent::StartCompleted { result: Ok(()) });
        assert_eq!(
            action,
            Some(Action::ProvisionDisplay {
                name: "vm1".to_string()
            })
        );

        let (state, action) = state.step(SessionEvent::DisplayProvisioned {
            result: Ok(endpoint()),
        });
        assert_eq!(
            state,
            SessionState::DisplayActive {
                name: "vm1".to_string(),
                endpoint: endpoint()
            }
        );
        assert_eq!(
            action,
            Some(Action::AttachDisplay {
                name: "vm1".to_string(),
                endpoint: endpoint()
            })
        );
    }

    #[test]
    fn test_empty_address_is_a_noop() {
        let (state, action) = SessionState::Idle.step(SessionEvent::Connect {
            address: "  ".to_string(),
            port: 5962,
        });
        assert_eq!(state, SessionState::Idle);
        assert_eq!(action, None);
    }

    #[test]
    fn test_connect_restarts_from_error_and_display_active() {
        let error = SessionState::Error {
            message: "boom".to_string(),
        };
        let (state, action) = error.step(connect_event());
        assert_eq!(state, SessionState::Connecting);
        assert!(action.is_some());

        let active = SessionState::DisplayActive {
            name: "vm1".to_string(),
            endpoint: endpoint(),
        };
        let (state, _) = active.step(connect_event());
        assert_eq!(state, SessionState::Connecting);
    }

    #[test]
    fn test_connect_ignored_mid_flight() {
        let (state, action) = SessionState::AwaitingMachineList.step(connect_event());
        assert_eq!(state, SessionState::AwaitingMachineList);
        assert_eq!(action, None);
    }

    #[test]
    fn test_list_failure_surfaces_server_error() {
        let (state, action) = SessionState::AwaitingMachineList.step(SessionEvent::MachinesListed {
            result: Err("bus unavailable".to_string()),
        });
        assert_eq!(
            state,
            SessionState::Error {
                message: "bus unavailable".to_string()
            }
        );
        assert_eq!(action, None);
    }

    #[test]
    fn test_start_failure_carries_message() {
        let starting = SessionState::Starting {
            name: "vm1".to_string(),
        };
        let (state, _) = starting.step(SessionEvent::StartCompleted {
            result: Err("org.freedesktop.DBus.Error.NoSuchMachine: not found".to_string()),
        });
        assert_eq!(
            state,
            SessionState::Error {
                message: "org.freedesktop.DBus.Error.NoSuchMachine: not found".to_string()
            }
        );
    }

    #[test]
    fn test_selection_with_nothing_pending_is_a_noop() {
        let select = SessionEvent::MachineSelected {
            name: "vm1".to_string(),
        };
        let (state, action) = SessionState::Idle.step(select.clone());
        assert_eq!(state, SessionState::Idle);
        assert_eq!(action, None);

        // Duplicate click after the machine moved on.
        let starting = SessionState::Starting {
            name: "vm1".to_string(),
        };
        let (state, action) = starting.clone().step(select);
        assert_eq!(state, starting);
        assert_eq!(action, None);
    }

    #[test]
    fn test_unlisted_machine_cannot_be_started() {
        let awaiting = SessionState::AwaitingMachineSelection {
            machines: machines(),
        };
        let (state, action) = awaiting.clone().step(SessionEvent::MachineSelected {
            name: "ghost".to_string(),
        });
        assert_eq!(state, awaiting);
        assert_eq!(action, None);
    }

    #[test]
    fn test_stale_response_ignored() {
        // A late machine-list response after a session reset.
        let (state, action) = SessionState::Connecting.step(SessionEvent::MachinesListed {
            result: Ok(machines()),
        });
        assert_eq!(state, SessionState::Connecting);
        assert_eq!(action, None);
    }

    #[test]
    fn test_provision_failure() {
        let provisioning = SessionState::ProvisioningDisplay {
            name: "vm1".to_string(),
        };
        let (state, _) = provisioning.step(SessionEvent::DisplayProvisioned {
            result: Err("no endpoint".to_string()),
        });
        assert!(matches!(state, SessionState::Error { .. }));
    }
}
