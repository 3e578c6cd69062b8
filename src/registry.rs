//! Service Registry: the authoritative in-memory table of managed services
//!
//! A single mutex guards the name → service map. It is held only for one map
//! read or write; every I/O call (state store, runtime) happens after the guard
//! is dropped, using values cloned out while it was held.
//!
//! Persistence is best-effort: store failures are logged and swallowed, the
//! in-memory state stays authoritative for the running process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::storage::StateStore;
use crate::types::{ContainerServiceStatus, ManagedService, ServiceCategory};

/// Key under which a service's state is persisted
pub fn state_key(name: &str) -> String {
    format!("orchestrator:service:{name}:state")
}

/// The recovery-relevant subset of a `ManagedService`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub enabled: bool,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_restart_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub status: ContainerServiceStatus,
}

impl From<&ManagedService> for PersistedState {
    fn from(svc: &ManagedService) -> Self {
        Self {
            enabled: svc.enabled,
            failure_count: svc.failure_count,
            last_failure_at: svc.last_failure_at,
            last_restart_at: svc.last_restart_at,
            restart_count: svc.restart_count,
            status: svc.status,
        }
    }
}

/// Lenient read-side shape: every field optional, status kept as a raw string
/// so an unknown value only drops that one field.
#[derive(Debug, Deserialize)]
struct StoredState {
    enabled: Option<bool>,
    failure_count: Option<u32>,
    #[serde(default)]
    last_failure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_restart_at: Option<DateTime<Utc>>,
    restart_count: Option<u32>,
    status: Option<String>,
}

pub struct ServiceRegistry {
    services: Mutex<HashMap<String, ManagedService>>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            store,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ManagedService>> {
        self.services.lock().unwrap_or_else(|e| {
            warn!("Registry mutex poisoned, recovering");
            e.into_inner()
        })
    }

    /// Apply `f` to the named service; `None` when the name is unknown.
    fn mutate<R>(&self, name: &str, f: impl FnOnce(&mut ManagedService) -> R) -> Option<R> {
        let mut services = self.lock();
        services.get_mut(name).map(f)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Insert or overwrite by name
    pub fn register(&self, service: ManagedService) {
        debug!(service = %service.name, "Registering service");
        self.lock().insert(service.name.clone(), service);
    }

    /// Remove a service. Not used during normal operation.
    pub fn unregister(&self, name: &str) -> Option<ManagedService> {
        self.lock().remove(name)
    }

    // ========================================================================
    // Reads (snapshots)
    // ========================================================================

    pub fn get(&self, name: &str) -> Option<ManagedService> {
        self.lock().get(name).cloned()
    }

    /// All services, sorted by name
    pub fn get_all(&self) -> Vec<ManagedService> {
        let mut all: Vec<ManagedService> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn get_by_category(&self, category: ServiceCategory) -> Vec<ManagedService> {
        self.filtered(|s| s.category == category)
    }

    pub fn get_enabled(&self) -> Vec<ManagedService> {
        self.filtered(|s| s.enabled)
    }

    fn filtered(&self, pred: impl Fn(&ManagedService) -> bool) -> Vec<ManagedService> {
        let mut matching: Vec<ManagedService> =
            self.lock().values().filter(|s| pred(s)).cloned().collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        matching
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // ========================================================================
    // Mutators (no-ops for unknown names)
    // ========================================================================

    pub fn update_status(&self, name: &str, status: ContainerServiceStatus) {
        self.mutate(name, |s| s.status = status);
    }

    /// Bump the failure counter and stamp `last_failure_at`; returns the new count
    pub fn increment_failure(&self, name: &str) -> Option<u32> {
        let now = self.clock.now();
        self.mutate(name, |s| {
            s.failure_count = s.failure_count.saturating_add(1);
            s.last_failure_at = Some(now);
            s.failure_count
        })
    }

    /// Clear both the failure counter and its timestamp
    pub fn reset_failures(&self, name: &str) {
        self.mutate(name, |s| {
            s.failure_count = 0;
            s.last_failure_at = None;
        });
    }

    /// Bump the restart counter and stamp `last_restart_at`
    pub fn record_restart(&self, name: &str) {
        let now = self.clock.now();
        self.mutate(name, |s| {
            s.restart_count = s.restart_count.saturating_add(1);
            // Never move the timestamp backwards
            s.last_restart_at = Some(s.last_restart_at.map_or(now, |prev| prev.max(now)));
        });
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) {
        self.mutate(name, |s| s.enabled = enabled);
    }

    /// Status `Disabled` and `enabled = false` in one critical section
    pub fn mark_disabled(&self, name: &str) {
        self.mutate(name, |s| {
            s.enabled = false;
            s.status = ContainerServiceStatus::Disabled;
        });
    }

    /// Status `Starting` after a restart, unless auto-healing is off.
    /// Returns the resulting status.
    pub fn mark_starting_if_enabled(&self, name: &str) -> Option<ContainerServiceStatus> {
        self.mutate(name, |s| {
            if s.enabled {
                s.status = ContainerServiceStatus::Starting;
            } else {
                s.status = ContainerServiceStatus::Disabled;
            }
            s.status
        })
    }

    pub fn update_container_id(&self, name: &str, container_id: Option<String>) {
        self.mutate(name, |s| s.container_id = container_id);
    }

    pub fn update_image(&self, name: &str, image: Option<String>) {
        self.mutate(name, |s| s.image = image);
    }

    // ========================================================================
    // Persistence (best-effort)
    // ========================================================================

    /// Write the recovery subset of `name` to the state store
    pub fn persist_state(&self, name: &str) {
        let Some(state) = self.lock().get(name).map(PersistedState::from) else {
            return;
        };

        let value = match serde_json::to_value(&state) {
            Ok(v) => v,
            Err(e) => {
                warn!(service = %name, error = %e, "Failed to serialize service state");
                return;
            }
        };

        if let Err(e) = self.store.set(&state_key(name), &value) {
            warn!(
                service = %name,
                backend = self.store.backend_name(),
                error = %e,
                "Failed to persist service state"
            );
        }
    }

    pub fn persist_all(&self) {
        for name in self.names() {
            self.persist_state(&name);
        }
    }

    /// Restore persisted state into the registered service `name`.
    ///
    /// Returns true when a stored record was applied. Missing, malformed or
    /// partially invalid records are logged and leave in-memory values intact.
    pub fn load_state(&self, name: &str) -> bool {
        if !self.contains(name) {
            return false;
        }

        let value = match self.store.get(&state_key(name)) {
            Ok(Some(v)) => v,
            Ok(None) => {
                debug!(service = %name, "No persisted state");
                return false;
            }
            Err(e) => {
                warn!(service = %name, error = %e, "Failed to read persisted state");
                return false;
            }
        };

        let stored: StoredState = match serde_json::from_value(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(service = %name, error = %e, "Ignoring malformed persisted state");
                return false;
            }
        };

        let status = stored.status.as_deref().and_then(|raw| {
            raw.parse::<ContainerServiceStatus>()
                .map_err(|e| warn!(service = %name, error = %e, "Ignoring persisted status"))
                .ok()
        });

        self.mutate(name, |s| {
            if let Some(enabled) = stored.enabled {
                s.enabled = enabled;
            }
            if let Some(count) = stored.failure_count {
                s.failure_count = count;
            }
            if let Some(count) = stored.restart_count {
                s.restart_count = count;
            }
            s.last_failure_at = stored.last_failure_at;
            s.last_restart_at = stored.last_restart_at;
            if let Some(status) = status {
                s.status = status;
            }
        })
        .is_some()
    }

    /// Restore state for every registered service; returns how many records applied
    pub fn load_all_state(&self) -> usize {
        let restored = self
            .names()
            .iter()
            .filter(|name| self.load_state(name))
            .count();
        info!(restored, total = self.len(), "Loaded persisted service state");
        restored
    }

    /// Delete the persisted record for `name`
    pub fn clear_state(&self, name: &str) {
        if let Err(e) = self.store.delete(&state_key(name)) {
            warn!(service = %name, error = %e, "Failed to clear persisted state");
        }
    }
}
