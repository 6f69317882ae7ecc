//! Command line argument parsing
//!
//! Subcommands:
//! - `images`: List local images
//! - `ps`: List running containers
//! - `run`: Create and start a container from an image
//! - `stop`: Stop a container
//! - `logs`: Tail a container's logs until Ctrl-C
//! - `shell`: Open an interactive shell in a container
//! - `watch`: Publish the running container list every interval
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dockhand")]
#[command(author = "Dockhand Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tail container logs and open interactive shells in running containers")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Print events as JSON lines instead of plain text
    #[arg(long = "json", global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// List local images
    Images,
    /// List running containers
    Ps,
    /// Create and start a container from an image
    Run {
        /// Image name
        image: String,
    },
    /// Stop a container
    Stop {
        /// Container ID or name
        container: String,
    },
    /// Tail a container's logs until Ctrl-C
    Logs {
        /// Container ID or name
        container: String,
        /// Poll period in milliseconds
        #[arg(long = "interval", value_name = "MS")]
        interval_ms: Option<u64>,
        /// Fetch logs without timestamps
        #[arg(long = "no-timestamps")]
        no_timestamps: bool,
    },
    /// Open an interactive shell in a container
    Shell {
        /// Container ID or name
        container: String,
        /// Command to run instead of the configured shell
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Publish the running container list every interval
    Watch,
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }
}
