//! Event bridge between the core and its host.
//!
//! The host never registers callbacks with the engines. Instead the core
//! publishes [`Event`]s on an [`EventBridge`] and the host feeds named control
//! signals into a [`ControlRouter`], which turns them into calls on the typed
//! queues of the log tailer and the shell controller.

use crate::container::ContainerInfo;
use crate::shell::{DetachHandle, TerminationCause};
use crate::tail::TailStopHandle;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Signal and event names as seen by the host.
pub mod names {
    pub const STOP_LOG_TAIL: &str = "stop-log-tail";
    pub const SHELL_INPUT: &str = "shell-input";
    pub const SHELL_DETACH: &str = "shell-detach";

    pub const CONTAINERS_UPDATED: &str = "containers-updated";
    pub const NEW_LOG_CONTENT: &str = "new-log-content";
    pub const SHELL_OUTPUT: &str = "shell-output";
    pub const SHELL_CLOSED: &str = "shell-closed";
    pub const SHELL_ATTACH_FAILED: &str = "shell-attach-failed";
}

/// Notification published by the core.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    /// Current list of running containers
    ContainersUpdated(Vec<ContainerInfo>),
    /// Full log text of the tailed container
    NewLogContent(String),
    /// Bytes written by the remote shell
    ShellOutput(Vec<u8>),
    /// A shell session ended
    ShellClosed {
        container: String,
        cause: TerminationCause,
        exit_code: Option<i64>,
    },
    /// A shell session could not be established
    ShellAttachFailed { container: String, reason: String },
}

impl Event {
    /// Name of the event on the host side.
    pub fn name(&self) -> &'static str {
        match self {
            Event::ContainersUpdated(_) => names::CONTAINERS_UPDATED,
            Event::NewLogContent(_) => names::NEW_LOG_CONTENT,
            Event::ShellOutput(_) => names::SHELL_OUTPUT,
            Event::ShellClosed { .. } => names::SHELL_CLOSED,
            Event::ShellAttachFailed { .. } => names::SHELL_ATTACH_FAILED,
        }
    }
}

/// Publishing side of the bridge. Cheap to clone.
///
/// The queue is unbounded so that [`EventBridge::emit`] never blocks an engine
/// on a slow host: the tailer and the shell teardown path must not stall
/// behind rendering. Memory is bounded by the host's consumption rate; a host
/// that cannot keep up with `shell-output` should drop its receiver, after
/// which every producer discards events instead of queueing them.
#[derive(Debug, Clone)]
pub struct EventBridge {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventBridge {
    /// Create a bridge and the receiver the host subscribes with.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish an event. Returns `false` once the host has unsubscribed.
    pub fn emit(&self, event: Event) -> bool {
        trace!("Emitting {}", event.name());
        self.tx.send(event).is_ok()
    }

    /// Whether the host dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Control signal sent by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    StopLogTail,
    ShellInput(Vec<u8>),
    ShellDetach,
}

/// Errors decoding a named control signal.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Unknown control signal: {0}")]
    UnknownSignal(String),

    #[error("Control signal {0} requires a payload")]
    MissingPayload(&'static str),
}

impl ControlSignal {
    /// Decode a signal from its host-side name.
    pub fn from_named(name: &str, payload: Option<Vec<u8>>) -> Result<Self, BridgeError> {
        match name {
            names::STOP_LOG_TAIL => Ok(ControlSignal::StopLogTail),
            names::SHELL_DETACH => Ok(ControlSignal::ShellDetach),
            names::SHELL_INPUT => payload
                .map(ControlSignal::ShellInput)
                .ok_or(BridgeError::MissingPayload(names::SHELL_INPUT)),
            other => Err(BridgeError::UnknownSignal(other.to_string())),
        }
    }

    /// Name of the signal on the host side.
    pub fn name(&self) -> &'static str {
        match self {
            ControlSignal::StopLogTail => names::STOP_LOG_TAIL,
            ControlSignal::ShellInput(_) => names::SHELL_INPUT,
            ControlSignal::ShellDetach => names::SHELL_DETACH,
        }
    }
}

/// Routes host control signals onto the engines' typed queues.
///
/// Each signal kind is bound separately so one router can own the input
/// queue (and close it by being dropped) while another only detaches.
#[derive(Default)]
pub struct ControlRouter {
    tail_stop: Option<TailStopHandle>,
    shell_inputs: Option<mpsc::Sender<Vec<u8>>>,
    shell_detach: Option<DetachHandle>,
}

impl ControlRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `stop-log-tail` to this tailer.
    pub fn bind_tail(&mut self, stop: TailStopHandle) {
        self.tail_stop = Some(stop);
    }

    /// Route `shell-input` onto a session's input queue.
    pub fn bind_shell_input(&mut self, inputs: mpsc::Sender<Vec<u8>>) {
        self.shell_inputs = Some(inputs);
    }

    /// Route `shell-detach` to a session.
    ///
    /// The handle is taken from a reserved session, so a detach delivered
    /// before the session is established is not lost.
    pub fn bind_shell_detach(&mut self, detach: DetachHandle) {
        self.shell_detach = Some(detach);
    }

    /// Deliver a signal. Returns `false` when nothing is bound to receive it.
    pub async fn dispatch(&self, signal: ControlSignal) -> bool {
        debug!("Dispatching {}", signal.name());
        match signal {
            ControlSignal::StopLogTail => match &self.tail_stop {
                Some(stop) => {
                    stop.stop();
                    true
                }
                None => false,
            },
            ControlSignal::ShellInput(bytes) => match &self.shell_inputs {
                Some(inputs) => inputs.send(bytes).await.is_ok(),
                None => false,
            },
            ControlSignal::ShellDetach => match &self.shell_detach {
                Some(detach) => {
                    detach.detach();
                    true
                }
                None => false,
            },
        }
    }

    /// Decode and deliver a named signal.
    pub async fn dispatch_named(
        &self,
        name: &str,
        payload: Option<Vec<u8>>,
    ) -> Result<bool, BridgeError> {
        let signal = ControlSignal::from_named(name, payload)?;
        Ok(self.dispatch(signal).await)
    }
}
