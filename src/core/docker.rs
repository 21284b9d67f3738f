/// Docker Engine integration
///
/// Implements the container runtime port over the Docker socket

use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, LogOutput, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerSummary, MountPoint};
use bollard::Docker;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::runtime::{
    ContainerRuntime, ExecChunk, ExecRequest, ExecSession, MountInfo, RawContainer, RuntimeError,
};
use crate::utils::{DEFAULT_DOCKER_ROOT, DEFAULT_STOP_TIMEOUT};

/// How often an exec is polled for its exit code after its output closed
const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// bollard's own per-request timeout for local connections
const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Time the daemon may need past the grace period to kill and reap a container
const STOP_REQUEST_MARGIN: Duration = Duration::from_secs(30);

/// HTTP timeout long enough for a stop request to outlast its grace period
fn client_timeout(stop_timeout: Duration) -> Duration {
    DEFAULT_CLIENT_TIMEOUT.max(stop_timeout + STOP_REQUEST_MARGIN)
}

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    stop_timeout: Duration,
}

impl DockerRuntime {
    /// Connect to the local daemon and make sure it answers
    pub async fn connect(stop_timeout: Option<Duration>) -> Result<Self, RuntimeError> {
        let stop_timeout = stop_timeout.unwrap_or(DEFAULT_STOP_TIMEOUT);
        let docker = Docker::connect_with_local_defaults()
            .map_err(map_docker_error)?
            .with_timeout(client_timeout(stop_timeout));
        let runtime = Self { docker, stop_timeout };

        if !runtime.check_docker().await {
            return Err(RuntimeError::Unreachable(
                "Docker daemon did not answer ping. Is Docker running?".to_string(),
            ));
        }

        Ok(runtime)
    }

    /// Check if Docker daemon is accessible
    pub async fn check_docker(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn describe(&self, summary: ContainerSummary) -> Result<Option<RawContainer>, RuntimeError> {
        let id = match summary.id {
            Some(id) => id,
            None => return Ok(None),
        };

        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.chars().take(12).collect());

        let inspect = match self
            .docker
            .inspect_container(&id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            // Container went away between list and inspect
            Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => {
                debug!(container = %name, "container vanished during discovery");
                return Ok(None);
            }
            Err(e) => return Err(map_docker_error(e)),
        };

        // The config image is the reference the container was created from,
        // the summary image may already be a bare digest
        let image = inspect
            .config
            .as_ref()
            .and_then(|c| c.image.clone())
            .or(summary.image)
            .unwrap_or_default();

        let env = inspect
            .config
            .as_ref()
            .and_then(|c| c.env.clone())
            .unwrap_or_default();

        let mounts = inspect
            .mounts
            .unwrap_or_default()
            .into_iter()
            .filter_map(mount_info)
            .collect();

        Ok(Some(RawContainer { id, name, image, env, mounts }))
    }
}

fn mount_info(mount: MountPoint) -> Option<MountInfo> {
    Some(MountInfo {
        source: mount.source?,
        destination: mount.destination?,
        volume: mount.name,
    })
}

/// Translate bollard errors into the port's taxonomy
fn map_docker_error(err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError { status_code: 404, message } => {
            RuntimeError::NotFound(message)
        }
        DockerError::DockerResponseServerError { status_code, message } => RuntimeError::Api {
            status: status_code,
            message,
        },
        e @ (DockerError::IOError { .. }
        | DockerError::HyperResponseError { .. }
        | DockerError::RequestTimeoutError) => RuntimeError::Unreachable(e.to_string()),
        other => RuntimeError::Stream(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<RawContainer>, RuntimeError> {
        let options = Some(ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        });

        let summaries = self
            .docker
            .list_containers(options)
            .await
            .map_err(map_docker_error)?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if let Some(container) = self.describe(summary).await? {
                containers.push(container);
            }
        }

        Ok(containers)
    }

    // bollard answers 304 Not Modified with Ok, so stopping a stopped
    // container and starting a running one both succeed

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        // The stop endpoint returns once the container exited or was killed
        let options = Some(StopContainerOptions {
            t: self.stop_timeout.as_secs() as i64,
        });

        match self.docker.stop_container(id, options).await {
            Ok(()) => Ok(()),
            // A slow shutdown is a problem with this container, not the daemon
            Err(DockerError::RequestTimeoutError) => Err(RuntimeError::TimedOut(format!(
                "stop of {} did not complete within {}s grace period",
                id,
                self.stop_timeout.as_secs()
            ))),
            Err(e) => Err(map_docker_error(e)),
        }
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_docker_error)
    }

    async fn exec(&self, id: &str, request: ExecRequest) -> Result<ExecSession, RuntimeError> {
        let exec_config = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(request.cmd),
            env: (!request.env.is_empty()).then_some(request.env),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_config)
            .await
            .map_err(map_docker_error)?;

        let output = match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(map_docker_error)?
        {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(RuntimeError::Stream("exec started detached".to_string()));
            }
        };

        let output = output
            .filter_map(|chunk| async move {
                match chunk {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(ExecChunk::Stdout(message.to_vec())))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(ExecChunk::Stderr(message.to_vec()))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(map_docker_error(e))),
                }
            })
            .boxed();

        let docker = self.docker.clone();
        let exec_id = exec.id;
        let exit_code = Box::pin(async move {
            loop {
                let inspect = docker.inspect_exec(&exec_id).await.map_err(map_docker_error)?;
                if inspect.running != Some(true) {
                    return inspect.exit_code.ok_or_else(|| {
                        RuntimeError::Stream(format!("exec {} reported no exit code", exec_id))
                    });
                }
                tokio::time::sleep(EXEC_POLL_INTERVAL).await;
            }
        });

        Ok(ExecSession { output, exit_code })
    }

    async fn volumes_root(&self) -> Result<PathBuf, RuntimeError> {
        let info = self.docker.info().await.map_err(map_docker_error)?;
        let root = info.docker_root_dir.unwrap_or_else(|| {
            warn!("daemon did not report its root dir, assuming {}", DEFAULT_DOCKER_ROOT);
            DEFAULT_DOCKER_ROOT.to_string()
        });
        Ok(PathBuf::from(root).join("volumes"))
    }
}
