//! Container list monitoring.
//!
//! Publishes the list of running containers on a fixed interval for as long
//! as the host keeps its event receiver.

use crate::bridge::{Event, EventBridge};
use crate::container::RuntimeApi;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Container list monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Publish period in milliseconds
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// Periodic `containers-updated` publisher.
pub struct ContainerListMonitor {
    runtime: Arc<dyn RuntimeApi>,
    events: EventBridge,
    config: MonitorConfig,
}

impl ContainerListMonitor {
    /// Create a new container list monitor.
    pub fn new(runtime: Arc<dyn RuntimeApi>, events: EventBridge, config: MonitorConfig) -> Self {
        Self {
            runtime,
            events,
            config,
        }
    }

    /// Publish until `shutdown` fires or the host unsubscribes.
    ///
    /// Returns the number of lists published.
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut published = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let containers = match self.runtime.list_containers().await {
                Ok(containers) => containers,
                Err(e) => {
                    warn!("Failed to list containers: {}", e);
                    continue;
                }
            };

            debug!("Publishing {} containers", containers.len());
            if !self.events.emit(Event::ContainersUpdated(containers)) {
                debug!("Event receiver dropped, stopping container monitor");
                break;
            }
            published += 1;
        }

        published
    }
}
