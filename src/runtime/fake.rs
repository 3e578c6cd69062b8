//! In-memory container runtime
//!
//! Keeps a table of fake containers and records every command issued against
//! it. Used by the test suite and by the binary's `--simulate` mode.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{ContainerInfo, ContainerRuntime, RuntimeError};

/// A command observed by the fake runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Start(String),
    Stop(String),
    Restart(String),
    Exec(String, String),
}

#[derive(Debug, Clone)]
struct FakeContainer {
    info: ContainerInfo,
    exec_exit_code: i64,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    calls: Vec<RuntimeCall>,
    reachable: bool,
    fail_commands: bool,
}

#[derive(Debug)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                reachable: true,
                ..FakeState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add (or replace) a container
    pub fn add_container(&self, id: &str, name: &str, status: &str, image_tags: &[&str]) {
        let info = ContainerInfo {
            id: id.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            image_tags: image_tags.iter().map(|t| (*t).to_string()).collect(),
        };
        self.lock().containers.insert(
            id.to_string(),
            FakeContainer {
                info,
                exec_exit_code: 0,
            },
        );
    }

    pub fn remove_container(&self, id: &str) {
        self.lock().containers.remove(id);
    }

    pub fn set_status(&self, id: &str, status: &str) {
        if let Some(c) = self.lock().containers.get_mut(id) {
            c.info.status = status.to_string();
        }
    }

    /// Exit code returned by subsequent `exec` calls on this container
    pub fn set_exec_exit_code(&self, id: &str, code: i64) {
        if let Some(c) = self.lock().containers.get_mut(id) {
            c.exec_exit_code = code;
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Make start/stop/restart fail with `RuntimeError::Command`
    pub fn set_fail_commands(&self, fail: bool) {
        self.lock().fail_commands = fail;
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn start_count(&self) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::Start(_)))
    }

    pub fn restart_count(&self) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::Restart(_)))
    }

    pub fn exec_count(&self) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::Exec(..)))
    }

    fn count_calls(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn check_reachable(state: &FakeState) -> Result<(), RuntimeError> {
        if state.reachable {
            Ok(())
        } else {
            Err(RuntimeError::NotConnected("fake runtime offline".to_string()))
        }
    }

    fn set_state(&self, call: RuntimeCall, id: &str, status: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        Self::check_reachable(&state)?;
        state.calls.push(call);
        if state.fail_commands {
            return Err(RuntimeError::Command(format!("injected failure for {id}")));
        }
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.info.status = status.to_string();
        Ok(())
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Self::check_reachable(&self.lock())
    }

    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let state = self.lock();
        Self::check_reachable(&state)?;
        Ok(state
            .containers
            .values()
            .filter(|c| include_stopped || c.info.is_running())
            .map(|c| c.info.clone())
            .collect())
    }

    async fn get_container(&self, id: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        let state = self.lock();
        Self::check_reachable(&state)?;
        Ok(state.containers.get(id).map(|c| c.info.clone()))
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.set_state(RuntimeCall::Start(id.to_string()), id, "running")
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.set_state(RuntimeCall::Stop(id.to_string()), id, "exited")
    }

    async fn restart(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.set_state(RuntimeCall::Restart(id.to_string()), id, "running")
    }

    async fn exec(&self, id: &str, cmd: &str) -> Result<i64, RuntimeError> {
        let mut state = self.lock();
        Self::check_reachable(&state)?;
        state
            .calls
            .push(RuntimeCall::Exec(id.to_string(), cmd.to_string()));
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if !container.info.is_running() {
            return Err(RuntimeError::Command(format!("container {id} is not running")));
        }
        Ok(container.exec_exit_code)
    }
}
