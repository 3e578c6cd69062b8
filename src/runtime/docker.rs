//! Docker Engine runtime (bollard)

use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use std::time::Duration;

use super::{ContainerInfo, ContainerRuntime, RuntimeError};

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (unix socket / DOCKER_HOST).
    ///
    /// Connecting does not touch the daemon; call `ping()` to verify.
    pub fn connect() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::NotConnected(format!("failed to connect to Docker: {e}")))?;
        Ok(Self { client })
    }

    fn map_error(id: &str, err: BollardError) -> RuntimeError {
        match err {
            BollardError::DockerResponseServerError {
                status_code: 404, ..
            } => RuntimeError::NotFound(id.to_string()),
            other => RuntimeError::Command(other.to_string()),
        }
    }

    /// 304 means the container was already in the requested state
    fn not_modified(err: &BollardError) -> bool {
        matches!(
            err,
            BollardError::DockerResponseServerError {
                status_code: 304,
                ..
            }
        )
    }

    fn image_tags(image: Option<String>) -> Vec<String> {
        // Untagged containers report the image digest instead of a name
        image
            .filter(|i| !i.is_empty() && !i.starts_with("sha256:"))
            .into_iter()
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::NotConnected(format!("Docker ping failed: {e}")))
    }

    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: include_stopped,
            ..Default::default()
        };

        let summaries = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Command(format!("failed to list containers: {e}")))?;

        Ok(summaries
            .into_iter()
            .filter_map(|s| {
                let id = s.id?;
                let name = s
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                Some(ContainerInfo {
                    id,
                    name,
                    status: s.state.unwrap_or_default(),
                    image_tags: Self::image_tags(s.image),
                })
            })
            .collect())
    }

    async fn get_container(&self, id: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        let inspect = match self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                return match Self::map_error(id, e) {
                    RuntimeError::NotFound(_) => Ok(None),
                    other => Err(other),
                }
            }
        };

        let status = inspect
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_default();
        let image = inspect.config.and_then(|c| c.image);

        Ok(Some(ContainerInfo {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            name: inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            status,
            image_tags: Self::image_tags(image),
        }))
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if Self::not_modified(&e) => Ok(()),
            Err(e) => Err(Self::map_error(id, e)),
        }
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        };
        match self.client.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if Self::not_modified(&e) => Ok(()),
            Err(e) => Err(Self::map_error(id, e)),
        }
    }

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = RestartContainerOptions {
            t: isize::try_from(timeout.as_secs()).unwrap_or(isize::MAX),
        };
        self.client
            .restart_container(id, Some(options))
            .await
            .map_err(|e| Self::map_error(id, e))
    }

    async fn exec(&self, id: &str, cmd: &str) -> Result<i64, RuntimeError> {
        let exec = self
            .client
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-c", cmd]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Self::map_error(id, e))?;

        let started = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Self::map_error(id, e))?;

        // Drain output so the exec runs to completion before inspecting it
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                if let Err(e) = chunk {
                    tracing::debug!(container = %id, error = %e, "exec output stream error");
                    break;
                }
            }
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Self::map_error(id, e))?;

        inspect
            .exit_code
            .ok_or_else(|| RuntimeError::Command(format!("exec in {id} reported no exit code")))
    }
}
