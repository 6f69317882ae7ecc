//! Container runtime facade.
//!
//! This module is the only place that talks to Docker/Podman. Everything above
//! it (log tailing, shell sessions, the container list monitor) goes through the
//! [`RuntimeApi`] trait so the engines can be driven by any runtime backend.
//!
//! ## Components
//!
//! - `client`: bollard-backed [`ContainerClient`] with connection fallback
//! - `monitor`: periodic container list publisher
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dockhand::container::{ContainerClient, RuntimeApi};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ContainerClient::new().await?;
//!
//!     for container in client.list_containers().await? {
//!         println!("{} {}", container.short_id(), container.image);
//!     }
//!
//!     let logs = client.fetch_logs("my-container", true).await?;
//!     println!("{}", logs);
//!     Ok(())
//! }
//! ```

mod client;
mod monitor;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{ContainerClient, ContainerClientConfig, RuntimeType};
pub use monitor::{ContainerListMonitor, MonitorConfig};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncWrite;

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Docker/Podman API error
    #[error("Container API error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    /// Container not found
    #[error("Container not found: {0}")]
    NotFound(String),

    /// Exec session error
    #[error("Exec error: {0}")]
    ExecError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Could not reach any container runtime
    #[error("Connection error: {0}")]
    Connection(String),

    /// General error
    #[error("Container error: {0}")]
    Other(String),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Image summary as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Image ID
    pub id: String,
    /// Repository tags
    pub repo_tags: Vec<String>,
    /// Size in bytes
    pub size: i64,
    /// Creation timestamp (unix seconds)
    pub created: i64,
}

impl ImageInfo {
    /// Creation time as a UTC timestamp, if the runtime reported a valid one.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.created, 0).single()
    }
}

/// Container summary as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container ID
    pub id: String,
    /// Container names
    pub names: Vec<String>,
    /// Image name
    pub image: String,
    /// Container state (running, exited, ...)
    pub state: String,
    /// Human readable status
    pub status: String,
}

impl ContainerInfo {
    /// First 12 characters of the ID, the way `docker ps` shows it.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

/// Running state of an exec instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// Duplex byte connection to an attached exec instance.
///
/// `output` yields chunks written by the remote process (stdout and stderr
/// share the stream when a tty is allocated). `input` feeds the remote stdin.
/// Dropping both halves releases the connection.
pub struct ExecChannel {
    pub output: BoxStream<'static, Result<Vec<u8>>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

impl fmt::Debug for ExecChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecChannel").finish_non_exhaustive()
    }
}

/// Call surface over the container runtime's remote API.
///
/// Implementations are stateless from the caller's point of view and are
/// shared as `Arc<dyn RuntimeApi>` across the log tailer, the shell controller
/// and the container list monitor.
#[async_trait]
pub trait RuntimeApi: Send + Sync {
    /// List local images.
    async fn list_images(&self) -> Result<Vec<ImageInfo>>;

    /// List running containers.
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>>;

    /// Create a tty container from `image`, start it and return its ID.
    async fn create_and_start_container(&self, image: &str) -> Result<String>;

    /// Stop a container.
    async fn stop_container(&self, container_id: &str) -> Result<()>;

    /// Fetch the full combined stdout/stderr log of a container.
    async fn fetch_logs(&self, container_id: &str, timestamps: bool) -> Result<String>;

    /// Create an exec instance with stdin, stdout and stderr attached.
    async fn create_exec(&self, container_id: &str, cmd: &[String], tty: bool) -> Result<String>;

    /// Start an exec instance and attach to its streams.
    async fn attach_exec(&self, exec_id: &str, tty: bool) -> Result<ExecChannel>;

    /// Inspect an exec instance.
    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus>;
}
