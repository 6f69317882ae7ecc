//! CLI-specific functionality for dockhand
//!
//! This module contains all CLI-related code including argument parsing,
//! configuration discovery, and the terminal host that drives the engines.

pub mod args;
pub mod config;
pub mod host;

pub use args::{Args, Commands};
pub use config::{AppConfig, ConfigDiscovery};
