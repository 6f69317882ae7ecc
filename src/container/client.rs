//! Docker/Podman client wrapper.
//!
//! Provides the bollard-backed [`RuntimeApi`] implementation with automatic
//! connection handling, Podman fallback and health checking.

use crate::container::{
    ContainerError, ContainerInfo, ExecChannel, ExecStatus, ImageInfo, Result, RuntimeApi,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Container client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerClientConfig {
    /// Explicit runtime socket (e.g. `unix:///run/podman/podman.sock`)
    pub socket: Option<String>,
    /// Connection timeout in seconds
    pub timeout: u64,
    /// Seconds the runtime waits before killing a stopped container
    pub stop_timeout: i64,
}

impl Default for ContainerClientConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout: 120,
            stop_timeout: 10,
        }
    }
}

/// Docker/Podman API client wrapper.
///
/// Cloning is cheap; all clones share one connection pool.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
    config: ContainerClientConfig,
}

impl ContainerClient {
    /// Create a new container client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if neither Docker nor Podman are available or connection fails.
    pub async fn new() -> Result<Self> {
        Self::with_config(ContainerClientConfig::default()).await
    }

    /// Create a new container client with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to container runtime fails.
    pub async fn with_config(config: ContainerClientConfig) -> Result<Self> {
        let docker = Self::connect(&config)?;

        let client = Self {
            docker: Arc::new(docker),
            config,
        };

        // Verify connection works
        client.ping().await?;

        Ok(client)
    }

    /// Connect to Docker or Podman daemon.
    ///
    /// Tries multiple connection strategies in order:
    /// 1. Configured socket, if any
    /// 2. Local defaults (Unix socket, Windows named pipe or DOCKER_HOST)
    /// 3. Podman sockets (rootless, then system)
    fn connect(config: &ContainerClientConfig) -> Result<Docker> {
        if let Some(ref socket) = config.socket {
            debug!("Connecting to configured runtime socket: {}", socket);
            return Docker::connect_with_socket(socket, config.timeout, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    ContainerError::Connection(format!("Failed to connect to {}: {}", socket, e))
                });
        }

        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            let mut candidates = Vec::new();
            if let Ok(home) = std::env::var("HOME") {
                candidates.push(format!("unix://{}/run/podman/podman.sock", home));
            }
            if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
                candidates.push(format!("unix://{}/podman/podman.sock", runtime_dir));
            }
            candidates.push("unix:///run/podman/podman.sock".to_string());

            for socket in candidates {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(&socket, config.timeout, bollard::API_DEFAULT_VERSION)
                {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman socket {} failed: {}", socket, e);
                    }
                }
            }
        }

        Err(ContainerError::Connection(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.".to_string()
        ))
    }

    /// Ping the container runtime to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if ping fails.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| {
            ContainerError::Connection(format!("Failed to ping container runtime: {}", e))
        })?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    /// Get version information from the container runtime.
    ///
    /// # Errors
    ///
    /// Returns error if version query fails.
    pub async fn version(&self) -> Result<bollard::models::SystemVersion> {
        self.docker
            .version()
            .await
            .map_err(|e| ContainerError::Other(format!("Failed to get version: {}", e)))
    }

    /// Check if the runtime is Docker or Podman.
    ///
    /// # Errors
    ///
    /// Returns error if runtime detection fails.
    pub async fn runtime_type(&self) -> Result<RuntimeType> {
        let version = self.version().await?;

        let is_podman = version
            .components
            .map(|comps| {
                comps
                    .iter()
                    .any(|c| c.name.to_lowercase().contains("podman"))
            })
            .unwrap_or(false);

        if is_podman {
            return Ok(RuntimeType::Podman);
        }

        Ok(RuntimeType::Docker)
    }

    fn map_not_found(id: &str, e: bollard::errors::Error) -> ContainerError {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => ContainerError::NotFound(id.to_string()),
            e => ContainerError::ApiError(e),
        }
    }
}

#[async_trait]
impl RuntimeApi for ContainerClient {
    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let images = self
            .docker
            .list_images(Some(bollard::image::ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;

        Ok(images
            .into_iter()
            .map(|img| ImageInfo {
                id: img.id,
                repo_tags: img.repo_tags,
                size: img.size,
                created: img.created,
            })
            .collect())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        let containers = self
            .docker
            .list_containers(Some(bollard::container::ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                state: c.state.map(|s| s.to_string()).unwrap_or_default(),
                status: c.status.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_and_start_container(&self, image: &str) -> Result<String> {
        debug!("Creating container from image: {}", image);

        let config = bollard::container::Config {
            image: Some(image.to_string()),
            tty: Some(true),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                None::<bollard::container::CreateContainerOptions<String>>,
                config,
            )
            .await?;

        self.docker
            .start_container(
                &response.id,
                None::<bollard::container::StartContainerOptions<String>>,
            )
            .await?;

        info!("Started container {} from {}", response.id, image);
        Ok(response.id)
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        debug!("Stopping container: {}", container_id);

        self.docker
            .stop_container(
                container_id,
                Some(bollard::container::StopContainerOptions {
                    t: self.config.stop_timeout,
                }),
            )
            .await
            .map_err(|e| Self::map_not_found(container_id, e))?;

        info!("Stopped container: {}", container_id);
        Ok(())
    }

    async fn fetch_logs(&self, container_id: &str, timestamps: bool) -> Result<String> {
        let mut stream = self.docker.logs(
            container_id,
            Some(bollard::container::LogsOptions {
                stdout: true,
                stderr: true,
                timestamps,
                tail: "all".to_string(),
                ..Default::default()
            }),
        );

        // Frames arrive demultiplexed; tty containers produce console frames.
        let mut buf = Vec::new();
        while let Some(result) = stream.next().await {
            let log = result.map_err(|e| Self::map_not_found(container_id, e))?;
            buf.extend_from_slice(&log.into_bytes());
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn create_exec(&self, container_id: &str, cmd: &[String], tty: bool) -> Result<String> {
        debug!("Creating exec in {}: {:?}", container_id, cmd);

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(tty),
                    cmd: Some(cmd.to_vec()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Self::map_not_found(container_id, e))?;

        Ok(exec.id)
    }

    async fn attach_exec(&self, exec_id: &str, tty: bool) -> Result<ExecChannel> {
        let start = self
            .docker
            .start_exec(
                exec_id,
                Some(StartExecOptions {
                    detach: false,
                    tty,
                    output_capacity: None,
                }),
            )
            .await?;

        match start {
            StartExecResults::Attached { output, input } => Ok(ExecChannel {
                output: output
                    .map(|chunk| {
                        chunk
                            .map(|log| log.into_bytes().to_vec())
                            .map_err(ContainerError::from)
                    })
                    .boxed(),
                input,
            }),
            StartExecResults::Detached => Err(ContainerError::ExecError(
                "Unexpected detached execution".to_string(),
            )),
        }
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus> {
        let inspect = self.docker.inspect_exec(exec_id).await?;
        Ok(ExecStatus {
            running: inspect.running.unwrap_or(false),
            exit_code: inspect.exit_code,
        })
    }
}

/// Type of container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "Docker"),
            RuntimeType::Podman => write!(f, "Podman"),
        }
    }
}
