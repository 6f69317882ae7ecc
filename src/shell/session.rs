//! Shell session state and the activities that run inside one session.

use crate::bridge::{Event, EventBridge};
use crate::container::{ContainerError, RuntimeApi};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

/// Lifecycle of a shell session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Created,
    Attached,
    Active,
    Terminating,
    Closed,
}

/// First trigger that ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationCause {
    /// Reading from the remote connection failed
    OutputError,
    /// The remote closed its output stream
    OutputClosed,
    /// The exec process is no longer running
    ExecExited,
    /// Inspecting the exec process failed
    InspectFailed,
    /// The host detached
    Detached,
}

impl std::fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TerminationCause::OutputError => "output read failed",
            TerminationCause::OutputClosed => "output closed",
            TerminationCause::ExecExited => "shell exited",
            TerminationCause::InspectFailed => "exec inspect failed",
            TerminationCause::Detached => "detached",
        };
        f.write_str(text)
    }
}

/// Broadcast cancellation shared by every activity of a session.
///
/// Firing is idempotent; only the first cause is kept.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionCancel {
    token: CancellationToken,
    cause: Arc<OnceLock<TerminationCause>>,
}

impl SessionCancel {
    pub(crate) fn fire(&self, cause: TerminationCause) -> bool {
        let first = self.cause.set(cause).is_ok();
        if first {
            debug!("Shell session terminating: {}", cause);
        }
        self.token.cancel();
        first
    }

    pub(crate) fn cause(&self) -> Option<TerminationCause> {
        self.cause.get().copied()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Cancels the session when dropped.
    pub(crate) fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }
}

/// Detaches one shell session from outside the session task.
#[derive(Debug, Clone)]
pub struct DetachHandle {
    cancel: SessionCancel,
}

impl DetachHandle {
    pub(crate) fn new(cancel: SessionCancel) -> Self {
        Self { cancel }
    }

    /// Fire the session's cancellation. Safe to call repeatedly.
    pub fn detach(&self) {
        self.cancel.fire(TerminationCause::Detached);
    }

    pub fn is_detached(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Forward remote output to the host until the stream fails, ends or the
/// session is cancelled. Dropping `output` on return releases the read half.
///
/// Output keeps being read after the host unsubscribes; it is discarded.
pub(crate) async fn read_output(
    mut output: BoxStream<'static, Result<Vec<u8>, ContainerError>>,
    events: EventBridge,
    cancel: SessionCancel,
) {
    let mut host_gone = false;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            chunk = output.next() => match chunk {
                Some(Ok(bytes)) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    trace!("Shell output: {} bytes", bytes.len());
                    // Keep draining so the remote never blocks on a full pipe.
                    if !events.emit(Event::ShellOutput(bytes)) && !host_gone {
                        debug!("Event receiver dropped, discarding shell output");
                        host_gone = true;
                    }
                }
                Some(Err(e)) => {
                    debug!("Could not read shell output: {}", e);
                    cancel.fire(TerminationCause::OutputError);
                    break;
                }
                None => {
                    cancel.fire(TerminationCause::OutputClosed);
                    break;
                }
            }
        }
    }
}

/// Inspect the exec instance until it stops running. Returns its exit code
/// when the poller was the one that saw it exit.
pub(crate) async fn poll_liveness(
    runtime: Arc<dyn RuntimeApi>,
    exec_id: String,
    interval: Duration,
    cancel: SessionCancel,
) -> Option<i64> {
    loop {
        let inspected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = runtime.inspect_exec(&exec_id) => result,
        };

        match inspected {
            Ok(status) if !status.running => {
                cancel.fire(TerminationCause::ExecExited);
                return status.exit_code;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Could not inspect exec {}: {}", exec_id, e);
                cancel.fire(TerminationCause::InspectFailed);
                return None;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Write host input to the remote, one newline-terminated payload at a time,
/// until the session is cancelled.
pub(crate) async fn relay_input(
    input: &mut Pin<Box<dyn AsyncWrite + Send>>,
    inputs: &mut mpsc::Receiver<Vec<u8>>,
    cancel: &SessionCancel,
) {
    let mut open = true;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            payload = inputs.recv(), if open => match payload {
                Some(mut bytes) => {
                    bytes.push(b'\n');
                    trace!("Sending {} bytes to shell", bytes.len());
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        result = write_line(input, &bytes) => {
                            if let Err(e) = result {
                                warn!("Could not write shell input: {}", e);
                            }
                        }
                    }
                }
                None => {
                    debug!("Shell input queue closed");
                    open = false;
                }
            }
        }
    }
}

async fn write_line(
    input: &mut Pin<Box<dyn AsyncWrite + Send>>,
    bytes: &[u8],
) -> std::io::Result<()> {
    input.write_all(bytes).await?;
    input.flush().await
}
