//! Container runtime capability
//!
//! The orchestrator only needs a handful of verbs from the runtime; they are
//! collected in `ContainerRuntime` so the Docker client and the in-memory
//! fake are interchangeable.

#[cfg(feature = "docker")]
mod docker;
mod fake;

#[cfg(feature = "docker")]
pub use docker::DockerRuntime;
pub use fake::{FakeRuntime, RuntimeCall};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container runtime unreachable: {0}")]
    NotConnected(String),

    #[error("runtime command failed: {0}")]
    Command(String),
}

// ============================================================================
// Container Info
// ============================================================================

/// Runtime-level description of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Full runtime identifier
    pub id: String,
    /// Container name without the leading '/'
    pub name: String,
    /// Runtime state string ("running", "exited", ...)
    pub status: String,
    /// Image tags, first one is reported as the service image
    pub image_tags: Vec<String>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

// ============================================================================
// Runtime Trait
// ============================================================================

/// Operations the orchestrator issues against the container runtime.
///
/// Expected conditions (unknown container) come back as
/// `RuntimeError::NotFound`; callers convert every error into a boolean
/// failure or an unhealthy probe.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Verify the runtime is reachable
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<ContainerInfo>, RuntimeError>;

    /// `Ok(None)` when the id is unknown
    async fn get_container(&self, id: &str) -> Result<Option<ContainerInfo>, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    /// Run `cmd` inside the container, returning its exit code
    async fn exec(&self, id: &str, cmd: &str) -> Result<i64, RuntimeError>;

    /// Runtime state string, `Ok(None)` when the container does not exist
    async fn status(&self, id: &str) -> Result<Option<String>, RuntimeError> {
        Ok(self.get_container(id).await?.map(|c| c.status))
    }
}
