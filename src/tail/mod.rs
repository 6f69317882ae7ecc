//! Log tail engine.
//!
//! Polls a container's full combined log on a fixed interval and publishes a
//! `new-log-content` event each time the newest line changes. Refetching the
//! whole buffer avoids tracking stream offsets on the runtime side; the
//! fingerprint comparison keeps notifications to one per distinct tail line.
//!
//! ```rust,no_run
//! use dockhand::bridge::EventBridge;
//! use dockhand::container::ContainerClient;
//! use dockhand::tail::{LogTailer, TailConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Arc::new(ContainerClient::new().await?);
//!     let (events, mut rx) = EventBridge::channel();
//!     let (tailer, stop) = LogTailer::new(client, events, TailConfig::default());
//!
//!     let handle = tokio::spawn(async move { tailer.run("web").await });
//!     if let Some(event) = rx.recv().await {
//!         println!("{:?}", event);
//!     }
//!     stop.stop();
//!     handle.await?;
//!     Ok(())
//! }
//! ```

pub mod fingerprint;

pub use fingerprint::{FINGERPRINT_LEN, LogFingerprint, PollState, last_line};

use crate::bridge::{Event, EventBridge};
use crate::container::RuntimeApi;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Log tailing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Poll period in milliseconds
    pub poll_interval_ms: u64,
    /// Fingerprint budget in characters
    pub fingerprint_len: usize,
    /// Request per-line timestamps from the runtime
    pub timestamps: bool,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            fingerprint_len: FINGERPRINT_LEN,
            timestamps: true,
        }
    }
}

impl TailConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// One-way stop signal for a [`LogTailer`].
///
/// Stopping is idempotent; a stopped tailer cannot be restarted.
#[derive(Debug, Clone)]
pub struct TailStopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl TailStopHandle {
    pub fn stop(&self) {
        if !self.tx.send_replace(true) {
            debug!("Log tail stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Counters returned when a tailer finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailSummary {
    /// Ticks that reached the runtime
    pub polls: u64,
    /// Failed log fetches
    pub failures: u64,
    /// `new-log-content` events published
    pub notifications: u64,
}

/// Polling log tailer bound to one event bridge.
pub struct LogTailer {
    runtime: Arc<dyn RuntimeApi>,
    events: EventBridge,
    config: TailConfig,
    stop_rx: watch::Receiver<bool>,
}

impl LogTailer {
    /// Create a tailer and its stop handle.
    pub fn new(
        runtime: Arc<dyn RuntimeApi>,
        events: EventBridge,
        config: TailConfig,
    ) -> (Self, TailStopHandle) {
        let (tx, stop_rx) = watch::channel(false);
        let tailer = Self {
            runtime,
            events,
            config,
            stop_rx,
        };
        (tailer, TailStopHandle { tx: Arc::new(tx) })
    }

    /// Poll `container_id` until stopped.
    ///
    /// Stopping is the only way the loop ends. Fetch failures are logged and
    /// skipped; so is publishing after the host dropped its event receiver.
    pub async fn run(self, container_id: &str) -> TailSummary {
        let LogTailer {
            runtime,
            events,
            config,
            mut stop_rx,
        } = self;

        let period = config.poll_interval();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut state = PollState::default();
        let mut summary = TailSummary::default();
        let mut host_gone = false;

        info!("Tailing logs of {} every {:?}", container_id, period);

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                _ = interval.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                result = runtime.fetch_logs(container_id, config.timestamps) => result,
            };
            summary.polls += 1;

            let snapshot = match fetched {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Failed to fetch logs for {}: {}", container_id, e);
                    summary.failures += 1;
                    continue;
                }
            };

            let fingerprint = LogFingerprint::of(&snapshot, config.fingerprint_len);
            if state.observe(fingerprint) {
                debug!(
                    "New log content for {} ({})",
                    container_id,
                    state.last_emitted().as_str()
                );
                if events.emit(Event::NewLogContent(snapshot)) {
                    summary.notifications += 1;
                } else if !host_gone {
                    warn!(
                        "Event receiver dropped, log content for {} is discarded until stopped",
                        container_id
                    );
                    host_gone = true;
                }
            }
        }

        info!(
            "Stopped tailing {} after {} polls ({} notifications)",
            container_id, summary.polls, summary.notifications
        );
        summary
    }
}

/// Resolves once stop is signalled. Never resolves if every handle is gone.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}
