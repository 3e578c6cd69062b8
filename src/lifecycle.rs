//! Lifecycle Manager: restart/backoff/disable policy
//!
//! The only component that flips `enabled`, trips services into `Disabled`
//! and issues start/stop commands against the container runtime. Failure
//! accounting happens here and nowhere else.
//!
//! Restarts are never retried inside a call: a failed attempt is logged and
//! the next health poll drives the next attempt.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::registry::ServiceRegistry;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerServiceStatus, ManagedService};

// ============================================================================
// Policy
// ============================================================================

/// Minimum wait (seconds) after a failure before the next restart attempt.
///
/// `failure_count` is the count before the current failure is recorded, so the
/// first failure waits `base`. Saturates at `max`.
pub fn backoff(failure_count: u32, base: f64, max: f64) -> f64 {
    let exponent = i32::try_from(failure_count).unwrap_or(i32::MAX);
    (base * 2f64.powi(exponent)).min(max)
}

/// Whether policy allows a restart of `service` at `now`.
pub fn should_restart(service: &ManagedService, now: chrono::DateTime<chrono::Utc>) -> bool {
    if !service.enabled || service.failure_budget_exhausted() {
        return false;
    }
    match service.last_failure_at {
        None => true,
        Some(last_failure) => {
            let elapsed = now.signed_duration_since(last_failure);
            let elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;
            elapsed_secs
                >= backoff(
                    service.failure_count,
                    service.restart_backoff_base,
                    service.restart_backoff_max,
                )
        }
    }
}

// ============================================================================
// Outcomes and listener
// ============================================================================

/// What the lifecycle manager did in response to a health event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealAction {
    /// Container stopped and started again
    Restarted,
    /// Stopped container started
    Started,
    /// Restart/start attempted and failed
    RestartFailed { reason: String },
    /// Still inside the backoff window; nothing done this cycle
    InBackoff,
    /// Failure budget exhausted; auto-healing switched off
    Disabled,
    /// Container vanished from the runtime
    MarkedMissing,
    /// No action needed (disabled service, unknown name)
    NoActionNeeded,
}

impl std::fmt::Display for HealAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealAction::Restarted => write!(f, "restarted"),
            HealAction::Started => write!(f, "started"),
            HealAction::RestartFailed { reason } => write!(f, "restart failed: {}", reason),
            HealAction::InBackoff => write!(f, "waiting for backoff"),
            HealAction::Disabled => write!(f, "disabled after repeated failures"),
            HealAction::MarkedMissing => write!(f, "container missing"),
            HealAction::NoActionNeeded => write!(f, "no action needed"),
        }
    }
}

/// Receives restart and circuit-breaker notifications
pub trait LifecycleListener: Send + Sync {
    fn on_restart(&self, service: &ManagedService);
    fn on_disabled(&self, service: &ManagedService);
}

/// Listener that ignores everything
pub struct NoopLifecycleListener;

impl LifecycleListener for NoopLifecycleListener {
    fn on_restart(&self, _service: &ManagedService) {}
    fn on_disabled(&self, _service: &ManagedService) {}
}

/// Clears the in-flight marker for a service when dropped
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
    }
}

// ============================================================================
// Lifecycle Manager
// ============================================================================

pub struct LifecycleManager {
    registry: Arc<ServiceRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    listener: Arc<dyn LifecycleListener>,
    stop_timeout: Duration,
    /// Services with a restart/start currently in progress
    in_flight: Mutex<HashSet<String>>,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        listener: Arc<dyn LifecycleListener>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            runtime,
            listener,
            stop_timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn should_restart(&self, service: &ManagedService) -> bool {
        should_restart(service, self.registry.clock().now())
    }

    /// Mark `name` as having a restart in progress. `None` if one already is.
    fn claim(&self, name: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(name.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            name: name.to_string(),
        })
    }

    /// Is a restart/start for `name` currently running?
    pub fn is_in_flight(&self, name: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }

    /// Count one failed poll against the budget.
    ///
    /// `Ok(new_count)` when policy allows acting on the container now,
    /// otherwise `Err` with the action taken instead (trip, backoff, unknown).
    fn record_failure(&self, service: &ManagedService) -> Result<u32, HealAction> {
        // Backoff must be judged against the previous failure, before this one is stamped
        let can_restart = self.should_restart(service);

        let Some(new_count) = self.registry.increment_failure(&service.name) else {
            return Err(HealAction::NoActionNeeded);
        };

        if new_count >= service.max_failures {
            self.registry.mark_disabled(&service.name);
            self.registry.persist_state(&service.name);
            error!(
                service = %service.name,
                failure_count = new_count,
                max_failures = service.max_failures,
                "Failure budget exhausted, service disabled"
            );
            if let Some(snapshot) = self.registry.get(&service.name) {
                self.listener.on_disabled(&snapshot);
            }
            return Err(HealAction::Disabled);
        }

        self.registry.persist_state(&service.name);

        if !can_restart {
            debug!(
                service = %service.name,
                failure_count = new_count,
                backoff_secs = backoff(
                    service.failure_count,
                    service.restart_backoff_base,
                    service.restart_backoff_max
                ),
                "In backoff, skipping restart"
            );
            return Err(HealAction::InBackoff);
        }

        Ok(new_count)
    }

    /// Core transition for a failed probe on a running-but-unhealthy service.
    pub async fn handle_unhealthy(&self, service: &ManagedService) -> HealAction {
        if !service.enabled {
            return HealAction::NoActionNeeded;
        }
        let new_count = match self.record_failure(service) {
            Ok(count) => count,
            Err(action) => return action,
        };

        warn!(service = %service.name, failure_count = new_count, "Service unhealthy, restarting");
        match self.restart_service(&service.name).await {
            Ok(()) => HealAction::Restarted,
            Err(reason) => HealAction::RestartFailed { reason },
        }
    }

    /// The container exists but is not running: counts as a failure like an
    /// unhealthy poll, and the container is started when policy allows.
    pub async fn handle_stopped(&self, service: &ManagedService) -> HealAction {
        if !service.enabled {
            return HealAction::NoActionNeeded;
        }
        let new_count = match self.record_failure(service) {
            Ok(count) => count,
            Err(action) => return action,
        };

        info!(service = %service.name, failure_count = new_count, "Container stopped, starting");
        match self.start_container(&service.name).await {
            Ok(()) => HealAction::Started,
            Err(reason) => HealAction::RestartFailed { reason },
        }
    }

    /// The container no longer exists at the runtime level.
    pub fn handle_missing(&self, service: &ManagedService) -> HealAction {
        warn!(service = %service.name, "Container missing from runtime");
        self.registry
            .update_status(&service.name, ContainerServiceStatus::NotFound);
        self.registry.update_container_id(&service.name, None);
        self.registry.persist_state(&service.name);
        HealAction::MarkedMissing
    }

    /// Graceful stop then start. Records the restart and fires the listener on success.
    pub async fn restart_service(&self, name: &str) -> Result<(), String> {
        let Some(_guard) = self.claim(name) else {
            warn!(service = %name, "Restart already in progress, skipping");
            return Err("restart already in progress".to_string());
        };

        let container_id = self.container_id(name)?;

        if let Err(e) = self.runtime.stop(&container_id, self.stop_timeout).await {
            warn!(service = %name, error = %e, "Failed to stop container");
            return Err(format!("stop failed: {e}"));
        }
        if let Err(e) = self.runtime.start(&container_id).await {
            warn!(service = %name, error = %e, "Failed to start container");
            return Err(format!("start failed: {e}"));
        }

        self.record_success(name);
        info!(service = %name, "Service restarted");
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), String> {
        let Some(_guard) = self.claim(name) else {
            warn!(service = %name, "Start already in progress, skipping");
            return Err("start already in progress".to_string());
        };

        let container_id = self.container_id(name)?;

        if let Err(e) = self.runtime.start(&container_id).await {
            warn!(service = %name, error = %e, "Failed to start container");
            return Err(format!("start failed: {e}"));
        }

        self.record_success(name);
        info!(service = %name, "Service started");
        Ok(())
    }

    fn container_id(&self, name: &str) -> Result<String, String> {
        match self.registry.get(name) {
            None => Err(format!("unknown service '{name}'")),
            Some(svc) => svc.container_id.ok_or_else(|| {
                warn!(service = %name, "No container id, cannot act on service");
                "no container id".to_string()
            }),
        }
    }

    fn record_success(&self, name: &str) {
        self.registry.record_restart(name);
        // A disabled service stays Disabled until an explicit enable
        self.registry.mark_starting_if_enabled(name);
        self.registry.persist_state(name);
        if let Some(snapshot) = self.registry.get(name) {
            self.listener.on_restart(&snapshot);
        }
    }

    // ========================================================================
    // Operator commands
    // ========================================================================

    /// Operator-triggered restart, optionally starting from a clean failure slate.
    pub async fn manual_restart(&self, name: &str, reset_failures: bool) -> bool {
        if !self.registry.contains(name) {
            return false;
        }
        if reset_failures {
            self.registry.reset_failures(name);
            self.registry.persist_state(name);
        }
        self.restart_service(name).await.is_ok()
    }

    /// Operator-triggered start of a stopped container.
    pub async fn start_service(&self, name: &str) -> bool {
        if !self.registry.contains(name) {
            return false;
        }
        self.start_container(name).await.is_ok()
    }

    /// Re-arm auto-healing. Does not start the container.
    pub fn enable_service(&self, name: &str) -> bool {
        if !self.registry.contains(name) {
            return false;
        }
        self.registry.reset_failures(name);
        self.registry.set_enabled(name, true);
        self.registry
            .update_status(name, ContainerServiceStatus::Stopped);
        self.registry.persist_state(name);
        info!(service = %name, "Service enabled");
        true
    }

    /// Suppress future auto-restarts. Leaves the container running.
    pub fn disable_service(&self, name: &str) -> bool {
        if !self.registry.contains(name) {
            return false;
        }
        self.registry.mark_disabled(name);
        self.registry.persist_state(name);
        info!(service = %name, "Service disabled");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::runtime::{FakeRuntime, RuntimeCall};
    use crate::storage::InMemoryStateStore;
    use crate::types::{ServiceCategory, ServiceConfig};
    use chrono::Duration as ChronoDuration;

    #[derive(Default)]
    struct CountingListener {
        restarts: Mutex<Vec<String>>,
        disabled: Mutex<Vec<String>>,
    }

    impl LifecycleListener for CountingListener {
        fn on_restart(&self, service: &ManagedService) {
            self.restarts.lock().unwrap().push(service.name.clone());
        }
        fn on_disabled(&self, service: &ManagedService) {
            self.disabled.lock().unwrap().push(service.name.clone());
        }
    }

    struct Fixture {
        registry: Arc<ServiceRegistry>,
        runtime: Arc<FakeRuntime>,
        clock: Arc<ManualClock>,
        listener: Arc<CountingListener>,
        manager: LifecycleManager,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let registry = Arc::new(ServiceRegistry::new(
            Arc::new(InMemoryStateStore::new()),
            clock.clone(),
        ));
        let runtime = Arc::new(FakeRuntime::new());
        let listener = Arc::new(CountingListener::default());
        let manager = LifecycleManager::new(
            registry.clone(),
            runtime.clone(),
            listener.clone(),
            Duration::from_secs(5),
        );

        runtime.add_container("det-1", "stack-ai-detector-1", "running", &["detector:1"]);
        let mut config = ServiceConfig::new("AI Detector", ServiceCategory::AI, 8090);
        config.max_failures = 3;
        config.restart_backoff_base = 5.0;
        registry.register(
            ManagedService::from_config("ai-detector", &config).with_container("det-1", "detector:1"),
        );

        Fixture {
            registry,
            runtime,
            clock,
            listener,
            manager,
        }
    }

    #[test]
    fn backoff_values() {
        assert_eq!(backoff(0, 5.0, 300.0), 5.0);
        assert_eq!(backoff(1, 5.0, 300.0), 10.0);
        assert_eq!(backoff(5, 5.0, 300.0), 160.0);
        assert_eq!(backoff(6, 5.0, 300.0), 300.0);
        assert_eq!(backoff(u32::MAX, 5.0, 300.0), 300.0);
    }

    #[test]
    fn backoff_is_non_decreasing() {
        let mut prev = 0.0;
        for n in 0..64 {
            let b = backoff(n, 2.5, 1000.0);
            assert!(b >= prev, "backoff decreased at n={n}");
            assert!(b <= 1000.0);
            prev = b;
        }
    }

    #[test]
    fn should_restart_rules() {
        let f = fixture();
        let now = f.clock.now();
        let mut svc = f.registry.get("ai-detector").unwrap();
        assert!(should_restart(&svc, now));

        svc.enabled = false;
        assert!(!should_restart(&svc, now));
        svc.enabled = true;

        svc.failure_count = 3;
        assert!(!should_restart(&svc, now));
    }

    #[test]
    fn should_restart_respects_backoff_window() {
        let f = fixture();
        let t = f.clock.now();
        let mut svc = f.registry.get("ai-detector").unwrap();
        svc.failure_count = 2;
        svc.last_failure_at = Some(t);

        // backoff(2, 5, 300) = 20s
        assert!(!should_restart(&svc, t));
        assert!(!should_restart(&svc, t + ChronoDuration::milliseconds(19_999)));
        assert!(should_restart(&svc, t + ChronoDuration::seconds(20)));
        assert!(should_restart(&svc, t + ChronoDuration::seconds(500)));
    }

    #[tokio::test]
    async fn first_failure_restarts() {
        let f = fixture();
        let svc = f.registry.get("ai-detector").unwrap();

        let action = f.manager.handle_unhealthy(&svc).await;
        assert_eq!(action, HealAction::Restarted);

        let after = f.registry.get("ai-detector").unwrap();
        assert_eq!(after.failure_count, 1);
        assert_eq!(after.restart_count, 1);
        assert_eq!(after.status, ContainerServiceStatus::Starting);
        assert_eq!(after.last_restart_at, Some(f.clock.now()));
        assert_eq!(
            f.runtime.calls(),
            vec![
                RuntimeCall::Stop("det-1".to_string()),
                RuntimeCall::Start("det-1".to_string())
            ]
        );
        assert_eq!(f.listener.restarts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_failure_without_elapsed_time_is_backoff() {
        let f = fixture();
        let svc = f.registry.get("ai-detector").unwrap();
        f.manager.handle_unhealthy(&svc).await;

        let svc = f.registry.get("ai-detector").unwrap();
        assert_eq!(f.manager.handle_unhealthy(&svc).await, HealAction::InBackoff);
        assert_eq!(f.registry.get("ai-detector").unwrap().failure_count, 2);
        assert_eq!(f.runtime.start_count(), 1);

        // backoff(1, 5, 300) = 10s after the previous failure
        f.clock.advance(ChronoDuration::seconds(10));
        let svc = f.registry.get("ai-detector").unwrap();
        // failure_count is 2 now, so the window is 20s from the last failure
        assert_eq!(f.manager.handle_unhealthy(&svc).await, HealAction::Disabled);
    }

    #[tokio::test]
    async fn third_failure_trips_circuit_without_restart() {
        let f = fixture();
        for expected in 1..=3u32 {
            let svc = f.registry.get("ai-detector").unwrap();
            let action = f.manager.handle_unhealthy(&svc).await;
            let after = f.registry.get("ai-detector").unwrap();
            assert_eq!(after.failure_count, expected);

            let exhausted = after.failure_count >= after.max_failures;
            let disabled = after.status == ContainerServiceStatus::Disabled && !after.enabled;
            assert_eq!(exhausted, disabled);
            if expected == 3 {
                assert_eq!(action, HealAction::Disabled);
            }
        }

        // Only the first failure was allowed to restart
        assert_eq!(f.runtime.start_count(), 1);
        assert_eq!(f.runtime.restart_count(), 0);
        assert_eq!(*f.listener.disabled.lock().unwrap(), vec!["ai-detector"]);

        // Further unhealthy reports do nothing
        let svc = f.registry.get("ai-detector").unwrap();
        assert_eq!(f.manager.handle_unhealthy(&svc).await, HealAction::NoActionNeeded);
        assert_eq!(f.registry.get("ai-detector").unwrap().failure_count, 3);
    }

    #[tokio::test]
    async fn runtime_failure_is_reported_not_retried() {
        let f = fixture();
        f.runtime.set_fail_commands(true);
        let svc = f.registry.get("ai-detector").unwrap();

        let action = f.manager.handle_unhealthy(&svc).await;
        assert!(matches!(action, HealAction::RestartFailed { .. }));
        assert_eq!(f.runtime.calls().len(), 1);
        let after = f.registry.get("ai-detector").unwrap();
        assert_eq!(after.restart_count, 0);
        assert_eq!(after.failure_count, 1);
        assert!(!f.manager.is_in_flight("ai-detector"));
    }

    #[tokio::test]
    async fn stopped_container_is_started_not_restarted() {
        let f = fixture();
        f.runtime.set_status("det-1", "exited");
        let svc = f.registry.get("ai-detector").unwrap();

        assert_eq!(f.manager.handle_stopped(&svc).await, HealAction::Started);
        assert_eq!(f.runtime.calls(), vec![RuntimeCall::Start("det-1".to_string())]);
        let after = f.registry.get("ai-detector").unwrap();
        assert_eq!(after.restart_count, 1);
        assert_eq!(after.failure_count, 1);

        f.manager.disable_service("ai-detector");
        let svc = f.registry.get("ai-detector").unwrap();
        assert_eq!(f.manager.handle_stopped(&svc).await, HealAction::NoActionNeeded);
    }

    #[tokio::test]
    async fn crash_looping_container_trips_circuit() {
        let f = fixture();
        let mut actions = Vec::new();
        for _ in 0..6 {
            // Exits again right after every start
            f.runtime.set_status("det-1", "exited");
            let svc = f.registry.get("ai-detector").unwrap();
            actions.push(f.manager.handle_stopped(&svc).await);
            f.clock.advance(ChronoDuration::seconds(91));
        }

        assert_eq!(
            &actions[..3],
            &[HealAction::Started, HealAction::Started, HealAction::Disabled]
        );
        assert!(actions[3..].iter().all(|a| *a == HealAction::NoActionNeeded));
        assert_eq!(f.runtime.start_count(), 2);

        let svc = f.registry.get("ai-detector").unwrap();
        assert_eq!(svc.failure_count, 3);
        assert_eq!(svc.status, ContainerServiceStatus::Disabled);
        assert!(!svc.enabled);
        assert_eq!(*f.listener.disabled.lock().unwrap(), vec!["ai-detector"]);
    }

    #[tokio::test]
    async fn stopped_container_inside_backoff_is_counted() {
        let f = fixture();
        f.runtime.set_status("det-1", "exited");
        let svc = f.registry.get("ai-detector").unwrap();
        assert_eq!(f.manager.handle_stopped(&svc).await, HealAction::Started);

        // backoff(1, 5, 300) = 10s has not elapsed
        f.runtime.set_status("det-1", "exited");
        f.clock.advance(ChronoDuration::seconds(3));
        let svc = f.registry.get("ai-detector").unwrap();
        assert_eq!(f.manager.handle_stopped(&svc).await, HealAction::InBackoff);
        assert_eq!(f.registry.get("ai-detector").unwrap().failure_count, 2);
        assert_eq!(f.runtime.start_count(), 1);
    }

    #[tokio::test]
    async fn manual_restart_of_tripped_service_stays_disabled() {
        let f = fixture();
        for _ in 0..3 {
            let svc = f.registry.get("ai-detector").unwrap();
            f.manager.handle_unhealthy(&svc).await;
        }
        assert_eq!(
            f.registry.get("ai-detector").unwrap().status,
            ContainerServiceStatus::Disabled
        );

        assert!(f.manager.manual_restart("ai-detector", false).await);
        assert!(f.manager.start_service("ai-detector").await);

        let svc = f.registry.get("ai-detector").unwrap();
        assert_eq!(svc.restart_count, 3);
        assert!(svc.failure_budget_exhausted());
        assert_eq!(svc.status, ContainerServiceStatus::Disabled);
        assert!(!svc.enabled);
    }

    #[test]
    fn missing_container_clears_identity() {
        let f = fixture();
        let svc = f.registry.get("ai-detector").unwrap();
        assert_eq!(f.manager.handle_missing(&svc), HealAction::MarkedMissing);

        let after = f.registry.get("ai-detector").unwrap();
        assert_eq!(after.status, ContainerServiceStatus::NotFound);
        assert!(after.container_id.is_none());
        assert!(f.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn restart_without_container_id_fails() {
        let f = fixture();
        f.registry.update_container_id("ai-detector", None);
        assert!(f.manager.restart_service("ai-detector").await.is_err());
        assert!(f.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn manual_restart_with_reset() {
        let f = fixture();
        f.registry.increment_failure("ai-detector");
        f.registry.increment_failure("ai-detector");

        assert!(f.manager.manual_restart("ai-detector", true).await);
        let after = f.registry.get("ai-detector").unwrap();
        assert_eq!(after.failure_count, 0);
        assert!(after.last_failure_at.is_none());
        assert_eq!(after.restart_count, 1);

        assert!(!f.manager.manual_restart("ghost", true).await);
    }

    #[test]
    fn enable_and_disable_are_idempotent() {
        let f = fixture();
        f.registry.increment_failure("ai-detector");

        assert!(f.manager.disable_service("ai-detector"));
        assert!(f.manager.disable_service("ai-detector"));
        let svc = f.registry.get("ai-detector").unwrap();
        assert_eq!(svc.status, ContainerServiceStatus::Disabled);
        assert!(!svc.enabled);
        // Disabling never stops the container
        assert!(f.runtime.calls().is_empty());

        assert!(f.manager.enable_service("ai-detector"));
        assert!(f.manager.enable_service("ai-detector"));
        let svc = f.registry.get("ai-detector").unwrap();
        assert!(svc.enabled);
        assert_eq!(svc.status, ContainerServiceStatus::Stopped);
        assert_eq!(svc.failure_count, 0);
        assert!(svc.last_failure_at.is_none());

        assert!(!f.manager.enable_service("ghost"));
        assert!(!f.manager.disable_service("ghost"));
    }

    #[test]
    fn in_flight_guard_blocks_second_claim() {
        let f = fixture();
        let guard = f.manager.claim("ai-detector");
        assert!(guard.is_some());
        assert!(f.manager.claim("ai-detector").is_none());
        assert!(f.manager.is_in_flight("ai-detector"));

        drop(guard);
        assert!(!f.manager.is_in_flight("ai-detector"));
        assert!(f.manager.claim("ai-detector").is_some());
    }
}
