//! Interactive shell sessions inside containers.
//!
//! A session opens an exec instance running an interactive shell, then runs
//! three activities against one shared cancellation token:
//!
//! - the output reader, forwarding remote bytes as `shell-output` events
//! - the liveness poller, inspecting the exec instance on an interval
//! - the input relay, writing host input to the remote stdin
//!
//! Whichever of read failure, remote exit, or host detach happens first
//! fires the token; every activity observes it and the connection is released
//! before [`ShellSession::run`] returns. Dropping the `run` future fires the
//! token too and aborts the spawned activities.
//!
//! ```text
//! Created ──exec create+attach──▶ Attached ──spawn──▶ Active
//!                                                      │ first trigger
//!                                                      ▼
//!                          Closed ◀──release+join── Terminating
//! ```

mod session;

pub use session::{DetachHandle, SessionState, TerminationCause};

use crate::bridge::{Event, EventBridge};
use crate::container::{ContainerError, ExecChannel, RuntimeApi};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use session::SessionCancel;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shell session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Command started inside the container
    pub command: Vec<String>,
    /// Allocate a pseudo-terminal
    pub tty: bool,
    /// Delay between exec inspections in milliseconds
    pub liveness_interval_ms: u64,
    /// Capacity of the host input queue
    pub input_queue: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            command: vec!["bash".to_string()],
            tty: true,
            liveness_interval_ms: 200,
            input_queue: 64,
        }
    }
}

impl ShellConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }
}

/// Shell session errors.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// Another session is attached to the container
    #[error("A shell session is already attached to container {0}")]
    AlreadyAttached(String),

    /// Exec instance could not be created
    #[error("Could not create exec in container {container}: {source}")]
    CreateExec {
        container: String,
        #[source]
        source: ContainerError,
    },

    /// Exec instance could not be attached
    #[error("Could not attach to exec {exec_id}: {source}")]
    AttachExec {
        exec_id: String,
        #[source]
        source: ContainerError,
    },
}

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub exec_id: String,
    pub cause: TerminationCause,
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    session_id: Uuid,
    cancel: SessionCancel,
}

type Registry = Arc<DashMap<String, ActiveSession>>;

/// Opens shell sessions and tracks which containers have one attached.
pub struct ShellController {
    runtime: Arc<dyn RuntimeApi>,
    events: EventBridge,
    config: ShellConfig,
    active: Registry,
}

impl ShellController {
    pub fn new(runtime: Arc<dyn RuntimeApi>, events: EventBridge, config: ShellConfig) -> Self {
        Self {
            runtime,
            events,
            config,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Attach to `container_id` and relay `inputs` until the session ends.
    ///
    /// # Errors
    ///
    /// Returns error if a session is already attached to the container or the
    /// exec instance cannot be created or attached.
    pub async fn attach(
        &self,
        container_id: &str,
        inputs: mpsc::Receiver<Vec<u8>>,
    ) -> Result<SessionReport, ShellError> {
        self.session(container_id)?.run(inputs).await
    }

    /// Reserve a session on `container_id` without contacting the runtime yet.
    ///
    /// The reservation is released when the returned session finishes or is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::AlreadyAttached`] if the container has a session.
    pub fn session(&self, container_id: &str) -> Result<ShellSession, ShellError> {
        let session_id = Uuid::new_v4();
        let cancel = SessionCancel::default();

        match self.active.entry(container_id.to_string()) {
            Entry::Occupied(_) => {
                warn!("Rejecting second shell session for {}", container_id);
                return Err(ShellError::AlreadyAttached(container_id.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(ActiveSession {
                    session_id,
                    cancel: cancel.clone(),
                });
            }
        }

        let (state, _) = watch::channel(SessionState::Created);

        Ok(ShellSession {
            runtime: self.runtime.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
            container_id: container_id.to_string(),
            session_id,
            cancel,
            state,
            _registration: Registration {
                registry: self.active.clone(),
                container_id: container_id.to_string(),
                session_id,
            },
        })
    }

    /// Detach the session attached to `container_id`, if any.
    pub fn detach(&self, container_id: &str) -> bool {
        match self.active.get(container_id) {
            Some(entry) => {
                info!("Detaching shell session from {}", container_id);
                entry.cancel.fire(TerminationCause::Detached);
                true
            }
            None => false,
        }
    }

    /// Whether a session is currently attached to `container_id`.
    pub fn is_attached(&self, container_id: &str) -> bool {
        self.active.contains_key(container_id)
    }
}

/// Removes a session from the registry when dropped.
struct Registration {
    registry: Registry,
    container_id: String,
    session_id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let session_id = self.session_id;
        self.registry
            .remove_if(&self.container_id, |_, active| active.session_id == session_id);
    }
}

/// One interactive attachment to a container.
pub struct ShellSession {
    runtime: Arc<dyn RuntimeApi>,
    events: EventBridge,
    config: ShellConfig,
    container_id: String,
    session_id: Uuid,
    cancel: SessionCancel,
    state: watch::Sender<SessionState>,
    _registration: Registration,
}

impl ShellSession {
    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Watch the session's lifecycle state.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn detach_handle(&self) -> DetachHandle {
        DetachHandle::new(self.cancel.clone())
    }

    /// Establish the exec channel and relay `inputs` until the session ends.
    ///
    /// # Errors
    ///
    /// Returns error if the exec instance cannot be created or attached. No
    /// background activity is started in that case.
    pub async fn run(self, mut inputs: mpsc::Receiver<Vec<u8>>) -> Result<SessionReport, ShellError> {
        let ShellSession {
            runtime,
            events,
            config,
            container_id,
            session_id,
            cancel,
            state,
            _registration,
        } = self;

        // Dropping this future at any await point still tears the session down.
        let _teardown = cancel.drop_guard();

        info!(
            "Opening shell session {} in {}: {:?}",
            session_id, container_id, config.command
        );

        let channel = match establish(runtime.as_ref(), &container_id, &config).await {
            Ok(channel) => channel,
            Err(e) => {
                error!("{}", e);
                events.emit(Event::ShellAttachFailed {
                    container: container_id.clone(),
                    reason: e.to_string(),
                });
                state.send_replace(SessionState::Closed);
                return Err(e);
            }
        };
        let (exec_id, ExecChannel { output, mut input }) = channel;
        state.send_replace(SessionState::Attached);

        let reader = AbortOnDropHandle::new(tokio::spawn(session::read_output(
            output,
            events.clone(),
            cancel.clone(),
        )));
        let poller = AbortOnDropHandle::new(tokio::spawn(session::poll_liveness(
            runtime.clone(),
            exec_id.clone(),
            config.liveness_interval(),
            cancel.clone(),
        )));
        state.send_replace(SessionState::Active);
        debug!("Shell session {} active (exec {})", session_id, exec_id);

        session::relay_input(&mut input, &mut inputs, &cancel).await;
        state.send_replace(SessionState::Terminating);

        if let Err(e) = input.shutdown().await {
            debug!("Shell input shutdown failed: {}", e);
        }
        drop(input);

        if let Err(e) = reader.await {
            warn!("Shell output reader failed: {}", e);
        }
        let exit_code = match poller.await {
            Ok(code) => code,
            Err(e) => {
                warn!("Shell liveness poller failed: {}", e);
                None
            }
        };

        let cause = cancel.cause().unwrap_or(TerminationCause::Detached);
        state.send_replace(SessionState::Closed);
        info!(
            "Shell session {} in {} closed: {} (exit code {:?})",
            session_id, container_id, cause, exit_code
        );

        events.emit(Event::ShellClosed {
            container: container_id,
            cause,
            exit_code,
        });

        Ok(SessionReport {
            session_id,
            exec_id,
            cause,
            exit_code,
        })
    }
}

async fn establish(
    runtime: &dyn RuntimeApi,
    container_id: &str,
    config: &ShellConfig,
) -> Result<(String, ExecChannel), ShellError> {
    let exec_id = runtime
        .create_exec(container_id, &config.command, config.tty)
        .await
        .map_err(|source| ShellError::CreateExec {
            container: container_id.to_string(),
            source,
        })?;

    let channel = runtime
        .attach_exec(&exec_id, config.tty)
        .await
        .map_err(|source| ShellError::AttachExec {
            exec_id: exec_id.clone(),
            source,
        })?;

    Ok((exec_id, channel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::FakeRuntime;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn controller(runtime: Arc<FakeRuntime>) -> (ShellController, UnboundedReceiver<Event>) {
        let (events, rx) = EventBridge::channel();
        let controller = ShellController::new(runtime, events, ShellConfig::default());
        (controller, rx)
    }

    async fn wait_active(state: &mut watch::Receiver<SessionState>) {
        state
            .wait_for(|s| *s == SessionState::Active)
            .await
            .expect("session state sender dropped");
    }

    fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_shell_config_default() {
        let config = ShellConfig::default();
        assert_eq!(config.command, vec!["bash".to_string()]);
        assert!(config.tty);
        assert_eq!(config.liveness_interval(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_relay_appends_newline() {
        let runtime = FakeRuntime::new();
        let remote = runtime.expect_exec();
        let (controller, _rx) = controller(runtime);

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let detach = session.detach_handle();
        let (tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));

        wait_active(&mut state).await;
        tx.send(b"ls -la".to_vec()).await.unwrap();
        tx.send(b"exit".to_vec()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(remote.written_text(), "ls -la\nexit\n");

        detach.detach();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.cause, TerminationCause::Detached);
        assert_eq!(report.exec_id, "exec-web");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_output_is_forwarded() {
        let runtime = FakeRuntime::new();
        let mut remote = runtime.expect_exec();
        let (controller, mut rx) = controller(runtime);

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let (_tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));

        wait_active(&mut state).await;
        remote.send_output(b"root@web:/# ");
        assert_eq!(rx.recv().await, Some(Event::ShellOutput(b"root@web:/# ".to_vec())));

        remote.close_output();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.cause, TerminationCause::OutputClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_closes_session() {
        let runtime = FakeRuntime::new();
        let remote = runtime.expect_exec();
        let (controller, mut rx) = controller(runtime);

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let (_tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));

        wait_active(&mut state).await;
        remote.send_read_error();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.cause, TerminationCause::OutputError);
        assert_eq!(*state.borrow(), SessionState::Closed);
        assert_eq!(remote.releases(), 2);
        assert_eq!(remote.input_shutdowns.load(Ordering::SeqCst), 1);
        assert!(!controller.is_attached("web"));

        let events = drain(&mut rx);
        assert!(events.contains(&Event::ShellClosed {
            container: "web".to_string(),
            cause: TerminationCause::OutputError,
            exit_code: None,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exec_exit_closes_session() {
        let runtime = FakeRuntime::new();
        let remote = runtime.expect_exec();
        let (controller, _rx) = controller(runtime.clone());

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let (_tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));

        wait_active(&mut state).await;
        runtime.exec_exited.store(true, Ordering::SeqCst);

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.cause, TerminationCause::ExecExited);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(remote.releases(), 2);
        assert!(runtime.inspect_calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspect_failure_closes_session() {
        let runtime = FakeRuntime::new();
        let remote = runtime.expect_exec();
        let (controller, _rx) = controller(runtime.clone());

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let (_tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));

        wait_active(&mut state).await;
        runtime.fail_inspect.store(true, Ordering::SeqCst);

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.cause, TerminationCause::InspectFailed);
        assert_eq!(remote.releases(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_closes_session() {
        let runtime = FakeRuntime::new();
        let remote = runtime.expect_exec();
        let (controller, _rx) = controller(runtime);
        let controller = Arc::new(controller);

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let (_tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));

        wait_active(&mut state).await;
        assert!(controller.detach("web"));

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.cause, TerminationCause::Detached);
        assert_eq!(*state.borrow(), SessionState::Closed);
        assert_eq!(remote.releases(), 2);
        assert_eq!(remote.input_shutdowns.load(Ordering::SeqCst), 1);
        assert!(!controller.detach("web"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_and_read_error_race() {
        let runtime = FakeRuntime::new();
        let remote = runtime.expect_exec();
        let (controller, mut rx) = controller(runtime);

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let detach = session.detach_handle();
        let (_tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));

        wait_active(&mut state).await;
        remote.send_read_error();
        detach.detach();
        detach.detach();

        let report = handle.await.unwrap().unwrap();
        assert!(matches!(
            report.cause,
            TerminationCause::Detached | TerminationCause::OutputError
        ));
        assert_eq!(remote.input_shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(remote.releases(), 2);

        let closed = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, Event::ShellClosed { .. }))
            .count();
        assert_eq!(closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_attach_is_rejected() {
        let runtime = FakeRuntime::new();
        let _remote = runtime.expect_exec();
        let (controller, _rx) = controller(runtime.clone());

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let detach = session.detach_handle();
        let (_tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));
        wait_active(&mut state).await;

        let (_tx2, inputs2) = mpsc::channel(8);
        let second = controller.attach("web", inputs2).await;
        assert!(matches!(second, Err(ShellError::AlreadyAttached(ref c)) if c == "web"));
        assert_eq!(runtime.create_exec_calls.load(Ordering::SeqCst), 1);

        // Other containers are unaffected.
        let other = controller.session("db");
        assert!(other.is_ok());
        drop(other);

        detach.detach();
        handle.await.unwrap().unwrap();

        // The slot is free again once the first session closed.
        assert!(!controller.is_attached("web"));
        assert!(controller.session("web").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_exec_failure_spawns_nothing() {
        let runtime = FakeRuntime::new();
        runtime.fail_create_exec.store(true, Ordering::SeqCst);
        let (controller, mut rx) = controller(runtime.clone());

        let (_tx, inputs) = mpsc::channel(8);
        let result = controller.attach("ghost", inputs).await;

        assert!(matches!(result, Err(ShellError::CreateExec { .. })));
        assert_eq!(runtime.inspect_calls.load(Ordering::SeqCst), 0);
        assert!(!controller.is_attached("ghost"));
        assert!(matches!(
            rx.try_recv(),
            Ok(Event::ShellAttachFailed { ref container, .. }) if container == "ghost"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_exec_failure_is_terminal() {
        let runtime = FakeRuntime::new();
        runtime.fail_attach.store(true, Ordering::SeqCst);
        let (controller, _rx) = controller(runtime.clone());

        let session = controller.session("web").unwrap();
        let state = session.state();
        let (_tx, inputs) = mpsc::channel(8);
        let result = session.run(inputs).await;

        assert!(matches!(result, Err(ShellError::AttachExec { ref exec_id, .. }) if exec_id == "exec-web"));
        assert_eq!(*state.borrow(), SessionState::Closed);
        assert_eq!(runtime.inspect_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_input_queue_waits_for_other_triggers() {
        let runtime = FakeRuntime::new();
        let remote = runtime.expect_exec();
        let (controller, _rx) = controller(runtime);

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let (tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));

        wait_active(&mut state).await;
        drop(tx);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*state.borrow(), SessionState::Active);

        remote.send_read_error();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.cause, TerminationCause::OutputError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_while_created_closes_session() {
        let runtime = FakeRuntime::new();
        let remote = runtime.expect_exec();
        let (controller, mut rx) = controller(runtime.clone());

        let session = controller.session("web").unwrap();
        let state = session.state();
        session.detach_handle().detach();
        assert_eq!(*state.borrow(), SessionState::Created);

        let (_tx, inputs) = mpsc::channel(8);
        let report = tokio::spawn(session.run(inputs)).await.unwrap().unwrap();

        assert_eq!(report.cause, TerminationCause::Detached);
        assert_eq!(*state.borrow(), SessionState::Closed);
        assert_eq!(remote.releases(), 2);
        assert_eq!(remote.input_shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.inspect_calls.load(Ordering::SeqCst), 0);
        assert!(!controller.is_attached("web"));
        assert!(drain(&mut rx).contains(&Event::ShellClosed {
            container: "web".to_string(),
            cause: TerminationCause::Detached,
            exit_code: None,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_session_releases_connection() {
        let runtime = FakeRuntime::new();
        let remote = runtime.expect_exec();
        let (controller, _rx) = controller(runtime.clone());

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let (_tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));

        wait_active(&mut state).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_millis(500)).await;

        let calls = runtime.inspect_calls.load(Ordering::SeqCst);
        assert!(calls >= 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runtime.inspect_calls.load(Ordering::SeqCst), calls);

        assert_eq!(remote.output_releases.load(Ordering::SeqCst), 1);
        assert_eq!(remote.input_releases.load(Ordering::SeqCst), 1);
        assert!(!controller.is_attached("web"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_is_drained_after_host_unsubscribes() {
        let runtime = FakeRuntime::new();
        let mut remote = runtime.expect_exec();
        let (controller, rx) = controller(runtime);

        let session = controller.session("web").unwrap();
        let mut state = session.state();
        let (_tx, inputs) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(inputs));

        wait_active(&mut state).await;
        drop(rx);
        remote.send_output(b"first");
        remote.send_output(b"second");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*state.borrow(), SessionState::Active);

        remote.close_output();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.cause, TerminationCause::OutputClosed);
        assert_eq!(remote.releases(), 2);
    }
}
