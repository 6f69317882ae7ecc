//! # Dockhand
//!
//! Live container log tailing and interactive exec shells, driven through a
//! small event bridge so any presentation layer can sit on top.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: Runtime client facade over Docker/Podman and the container list monitor
//! - **[`tail`]**: Polling log tailer with last-line fingerprint deduplication
//! - **[`shell`]**: Interactive exec session controller with one shared cancellation per session
//! - **[`bridge`]**: Named events published to the host and control signals routed back
//! - **[`cli`]**: Command line host, argument parsing and configuration discovery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dockhand::bridge::{Event, EventBridge};
//! use dockhand::container::ContainerClient;
//! use dockhand::tail::{LogTailer, TailConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = Arc::new(ContainerClient::new().await?);
//!     let (events, mut rx) = EventBridge::channel();
//!     let (tailer, stop) = LogTailer::new(runtime, events, TailConfig::default());
//!
//!     tokio::spawn(async move { tailer.run("web").await });
//!
//!     while let Some(Event::NewLogContent(text)) = rx.recv().await {
//!         println!("{}", text);
//!         stop.stop();
//!     }
//!     Ok(())
//! }
//! ```

/// Container runtime access.
///
/// Wraps the Docker Engine API (or a Podman socket speaking it) behind the
/// [`container::RuntimeApi`] trait the engines depend on.
pub mod container;

/// Log tail engine.
pub mod tail;

/// Interactive shell session controller.
///
/// Owns the exec lifecycle: output forwarding, liveness polling, input relay
/// and the single teardown path shared by all of them.
pub mod shell;

/// Event bridge between the engines and a host.
pub mod bridge;

/// Environment constants and path utilities.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use bridge::{ControlRouter, ControlSignal, Event, EventBridge};
pub use container::{ContainerClient, ContainerError, RuntimeApi};
pub use shell::{SessionReport, ShellConfig, ShellController, ShellError};
pub use tail::{LogTailer, TailConfig, TailStopHandle};
