//! Terminal host for the core engines.
//!
//! Plays the role of the presentation layer: feeds control signals from the
//! keyboard (stdin lines, Ctrl-C) into a [`ControlRouter`] and renders the
//! events the engines publish.

use super::args::{Args, Commands};
use super::config::{AppConfig, ConfigDiscovery};
use crate::bridge::{ControlRouter, ControlSignal, Event, EventBridge};
use crate::container::{
    ContainerClient, ContainerInfo, ContainerListMonitor, ImageInfo, RuntimeApi,
};
use crate::shell::ShellController;
use crate::tail::{LogTailer, TailConfig};
use anyhow::{Context, Result, bail};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Execute the parsed command line.
pub async fn run(args: Args) -> Result<()> {
    let config = ConfigDiscovery::load(args.config.as_deref())?;

    if args.command == Commands::ShowConfig {
        ConfigDiscovery::show_discovery_info();
        println!();
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let client = ContainerClient::with_config(config.runtime.clone())
        .await
        .context("Could not initialize the container runtime client")?;
    info!("Connected to {}", client.runtime_type().await?);
    let runtime: Arc<dyn RuntimeApi> = Arc::new(client);

    let mut printer = EventPrinter::new(args.json);

    match args.command {
        Commands::Images => {
            let images = runtime.list_images().await?;
            print_images(&images);
        }
        Commands::Ps => {
            let containers = runtime.list_containers().await?;
            print_containers(&containers);
        }
        Commands::Run { image } => {
            let id = runtime.create_and_start_container(&image).await?;
            println!("{}", id);
        }
        Commands::Stop { container } => {
            runtime.stop_container(&container).await?;
            println!("{}", container);
        }
        Commands::Logs {
            container,
            interval_ms,
            no_timestamps,
        } => {
            let mut tail = config.tail.clone();
            if let Some(ms) = interval_ms {
                tail.poll_interval_ms = ms.max(1);
            }
            if no_timestamps {
                tail.timestamps = false;
            }
            tail_logs(runtime, &container, tail, &mut printer).await?;
        }
        Commands::Shell { container, command } => {
            let mut shell = config.shell.clone();
            if !command.is_empty() {
                shell.command = command;
            }
            open_shell(runtime, &container, AppConfig { shell, ..config }, &mut printer).await?;
        }
        Commands::Watch => {
            watch_containers(runtime, &config, &mut printer).await;
        }
        Commands::ShowConfig => {}
    }

    Ok(())
}

async fn tail_logs(
    runtime: Arc<dyn RuntimeApi>,
    container: &str,
    config: TailConfig,
    printer: &mut EventPrinter,
) -> Result<()> {
    let (events, mut rx) = EventBridge::channel();
    let (tailer, stop) = LogTailer::new(runtime, events, config);

    let mut router = ControlRouter::new();
    router.bind_tail(stop);

    let container_id = container.to_string();
    let handle = tokio::spawn(async move { tailer.run(&container_id).await });

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => printer.print(&event)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                router.dispatch(ControlSignal::StopLogTail).await;
            }
        }
    }

    let summary = handle.await?;
    debug!("Log tail finished: {:?}", summary);
    Ok(())
}

async fn open_shell(
    runtime: Arc<dyn RuntimeApi>,
    container: &str,
    config: AppConfig,
    printer: &mut EventPrinter,
) -> Result<()> {
    let (events, mut rx) = EventBridge::channel();
    let controller = ShellController::new(runtime, events, config.shell.clone());
    let (input_tx, inputs) = mpsc::channel(config.shell.input_queue);

    // Reserve first so Ctrl-C is delivered even before the exec is attached.
    let session = controller.session(container)?;
    let mut detach_router = ControlRouter::new();
    detach_router.bind_shell_detach(session.detach_handle());

    let mut input_router = ControlRouter::new();
    input_router.bind_shell_input(input_tx);

    let session = tokio::spawn(session.run(inputs));

    // On EOF the router is dropped, closing the input queue; the session
    // keeps running until the shell exits or the user detaches.
    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !input_router
                        .dispatch(ControlSignal::ShellInput(line.into_bytes()))
                        .await
                    {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Could not read stdin: {}", e);
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    printer.print(&event)?;
                    if matches!(event, Event::ShellClosed { .. } | Event::ShellAttachFailed { .. }) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                detach_router.dispatch(ControlSignal::ShellDetach).await;
            }
        }
    }

    stdin_task.abort();
    let report = session.await??;
    debug!("Shell session finished: {:?}", report);
    if let Some(code) = report.exit_code.filter(|code| *code != 0) {
        bail!("Shell exited with code {}", code);
    }
    Ok(())
}

async fn watch_containers(runtime: Arc<dyn RuntimeApi>, config: &AppConfig, printer: &mut EventPrinter) {
    let (events, mut rx) = EventBridge::channel();
    let monitor = ContainerListMonitor::new(runtime, events, config.monitor.clone());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(monitor.run(shutdown.clone()));

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    if let Err(e) = printer.print(&event) {
                        warn!("Could not print event: {}", e);
                        shutdown.cancel();
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => shutdown.cancel(),
        }
    }

    if let Ok(published) = handle.await {
        debug!("Container monitor published {} lists", published);
    }
}

/// Renders events on stdout.
struct EventPrinter {
    json: bool,
    printed_log: String,
}

impl EventPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            printed_log: String::new(),
        }
    }

    fn print(&mut self, event: &Event) -> Result<()> {
        let mut stdout = std::io::stdout().lock();

        if self.json {
            writeln!(stdout, "{}", serde_json::to_string(event)?)?;
            return Ok(());
        }

        match event {
            Event::NewLogContent(text) => {
                // Print only what was appended since the last snapshot.
                let fresh = text
                    .strip_prefix(self.printed_log.as_str())
                    .unwrap_or(text.as_str());
                stdout.write_all(fresh.as_bytes())?;
                self.printed_log.clone_from(text);
            }
            Event::ShellOutput(bytes) => stdout.write_all(bytes)?,
            Event::ContainersUpdated(containers) => {
                drop(stdout);
                print_containers(containers);
                println!();
                return Ok(());
            }
            Event::ShellClosed {
                container, cause, ..
            } => eprintln!("\n[shell on {} closed: {}]", container, cause),
            Event::ShellAttachFailed { container, reason } => {
                eprintln!("[could not open shell on {}: {}]", container, reason)
            }
        }

        stdout.flush()?;
        Ok(())
    }
}

fn print_images(images: &[ImageInfo]) {
    println!("{:<20} {:<40} {:>10} {:<20}", "IMAGE ID", "TAGS", "SIZE", "CREATED");
    for image in images {
        let id = image.id.trim_start_matches("sha256:");
        let created = image
            .created_at()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{:<20} {:<40} {:>8.1}MB {:<20}",
            id.get(..12).unwrap_or(id),
            image.repo_tags.join(", "),
            image.size as f64 / 1_048_576.0,
            created
        );
    }
}

fn print_containers(containers: &[ContainerInfo]) {
    println!("{:<14} {:<30} {:<24} {}", "CONTAINER ID", "IMAGE", "NAMES", "STATUS");
    for container in containers {
        let names: Vec<&str> = container
            .names
            .iter()
            .map(|n| n.trim_start_matches('/'))
            .collect();
        println!(
            "{:<14} {:<30} {:<24} {}",
            container.short_id(),
            container.image,
            names.join(","),
            container.status
        );
    }
}
