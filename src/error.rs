//! Orchestrator-level error taxonomy
//!
//! Only startup surfaces these as `Err`. Operator commands report failure as
//! `false`/`None` and the background loop logs and continues.

use thiserror::Error;

use crate::runtime::RuntimeError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Runtime unreachable at startup; nothing was registered
    #[error("container runtime not connected: {0}")]
    NotConnected(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("orchestrator already running")]
    AlreadyRunning,
}
