//! Orchestrator: owns the registry and wires discovery, health and lifecycle
//!
//! Startup order:
//! 1. config check (disabled ⇒ no-op)
//! 2. runtime connectivity
//! 3. discovery + registration (status seeded `Running`)
//! 4. persisted state recovery
//! 5. "discovered" events
//! 6. Health Monitor construction
//! 7. polling loop start
//!
//! Commands return plain `bool`/`Option` results; event broadcast failures
//! are logged and never change a command's outcome.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::catalog::ServiceCatalog;
use crate::clock::{Clock, SystemClock};
use crate::config::OrchestratorSettings;
use crate::discovery::discover_all;
use crate::error::OrchestratorError;
use crate::events::EventBroadcaster;
use crate::health::{HealthListener, HealthMonitor, MonitorSettings, TickSummary};
use crate::lifecycle::{HealAction, LifecycleListener, LifecycleManager};
use crate::registry::ServiceRegistry;
use crate::runtime::ContainerRuntime;
use crate::storage::StateStore;
use crate::types::{ContainerServiceStatus, ManagedService, ServiceEvent, ServiceView};

// ============================================================================
// Event relay
// ============================================================================

/// Turns registry snapshots into `service_status` events.
struct EventRelay {
    registry: Arc<ServiceRegistry>,
    broadcaster: Arc<dyn EventBroadcaster>,
}

impl EventRelay {
    fn emit_service(&self, service: &ManagedService, message: &str) {
        let view = ServiceView::from_service(service, self.registry.clock().now());
        let event = ServiceEvent::service_status(view, message);
        match self.broadcaster.broadcast(&event) {
            Ok(receivers) => {
                debug!(service = %service.name, receivers, event_message = message, "Event broadcast");
            }
            Err(e) => {
                warn!(service = %service.name, error = %e, "Failed to broadcast event");
            }
        }
    }

    /// Emit using the current registry snapshot of `name`
    fn emit(&self, name: &str, message: &str) {
        if let Some(service) = self.registry.get(name) {
            self.emit_service(&service, message);
        }
    }
}

impl LifecycleListener for EventRelay {
    fn on_restart(&self, service: &ManagedService) {
        self.emit_service(service, "Container restarted");
    }

    fn on_disabled(&self, service: &ManagedService) {
        let message = format!(
            "Auto-healing disabled after {} consecutive failures",
            service.failure_count
        );
        self.emit_service(service, &message);
    }
}

// ============================================================================
// Health → lifecycle routing
// ============================================================================

/// Routes unhealthy polls to the lifecycle handler matching the recorded status.
struct HealingHandler {
    lifecycle: Arc<LifecycleManager>,
    events: Arc<EventRelay>,
}

#[async_trait]
impl HealthListener for HealingHandler {
    async fn on_health_change(&self, service: &ManagedService, healthy: bool) {
        if healthy {
            self.events.emit_service(service, "Service healthy");
            return;
        }

        let action = match service.status {
            ContainerServiceStatus::NotFound => self.lifecycle.handle_missing(service),
            ContainerServiceStatus::Stopped => self.lifecycle.handle_stopped(service).await,
            _ => self.lifecycle.handle_unhealthy(service).await,
        };

        debug!(service = %service.name, action = %action, "Healing action");
        match &action {
            // Restart, start and disable are announced by the lifecycle listener
            HealAction::Restarted
            | HealAction::Started
            | HealAction::Disabled
            | HealAction::NoActionNeeded => {}
            HealAction::RestartFailed { reason } => {
                self.events
                    .emit(&service.name, &format!("Auto-restart failed: {reason}"));
            }
            HealAction::InBackoff => {
                self.events
                    .emit(&service.name, "Unhealthy, waiting for restart backoff");
            }
            HealAction::MarkedMissing => {
                self.events
                    .emit(&service.name, "Container no longer exists");
            }
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    settings: OrchestratorSettings,
    catalog: ServiceCatalog,
    registry: Arc<ServiceRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    lifecycle: Arc<LifecycleManager>,
    events: Arc<EventRelay>,
    /// Present while the polling loop runs; the async lock serializes start/shutdown
    monitor: AsyncMutex<Option<Arc<HealthMonitor>>>,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        catalog: ServiceCatalog,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn StateStore>,
        broadcaster: Arc<dyn EventBroadcaster>,
    ) -> Self {
        Self::with_clock(settings, catalog, runtime, store, broadcaster, Arc::new(SystemClock))
    }

    /// Same as `new`, reading time from `clock`
    pub fn with_clock(
        settings: OrchestratorSettings,
        catalog: ServiceCatalog,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn StateStore>,
        broadcaster: Arc<dyn EventBroadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::new(store, clock));
        let events = Arc::new(EventRelay {
            registry: registry.clone(),
            broadcaster,
        });
        let lifecycle = Arc::new(LifecycleManager::new(
            registry.clone(),
            runtime.clone(),
            events.clone(),
            settings.stop_timeout(),
        ));

        Self {
            settings,
            catalog,
            registry,
            runtime,
            lifecycle,
            events,
            monitor: AsyncMutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    // ========================================================================
    // Startup / shutdown
    // ========================================================================

    /// Run the startup sequence. On `Err` nothing is polling and
    /// `is_running()` stays false.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        // 1. Config
        if !self.settings.enabled {
            info!("Orchestrator disabled by configuration");
            return Ok(());
        }

        let mut slot = self.monitor.lock().await;
        if slot.is_some() {
            return Err(OrchestratorError::AlreadyRunning);
        }

        // 2. Runtime connectivity
        if let Err(e) = self.runtime.ping().await {
            error!(error = %e, "Container runtime unreachable, orchestrator not started");
            return Err(OrchestratorError::NotConnected(e.to_string()));
        }

        // 3. Discovery
        let discovered = match discover_all(self.runtime.as_ref(), &self.catalog).await {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "Discovery failed, orchestrator not started");
                return Err(e.into());
            }
        };
        for mut service in discovered {
            // Optimistic seed, corrected by the first poll
            service.status = ContainerServiceStatus::Running;
            self.registry.register(service);
        }

        // 4. Recovery (after registration so every name can receive state)
        self.registry.load_all_state();

        // 5. Announce
        for service in self.registry.get_all() {
            self.events.emit_service(&service, "Service discovered");
        }

        // 6. Monitor bound to the shared registry
        let handler = Arc::new(HealingHandler {
            lifecycle: self.lifecycle.clone(),
            events: self.events.clone(),
        });
        let monitor = Arc::new(HealthMonitor::new(
            self.registry.clone(),
            self.runtime.clone(),
            handler,
            MonitorSettings {
                poll_interval: self.settings.poll_interval(),
                probe_timeout: self.settings.probe_timeout(),
                health_host: self.settings.health_host.clone(),
            },
        ));

        // 7. Polling
        monitor.start();
        *slot = Some(monitor);
        self.running.store(true, Ordering::SeqCst);

        info!(services = self.registry.len(), "Orchestrator started");
        Ok(())
    }

    /// Stop polling, persist every service, mark not-running.
    ///
    /// Containers keep running.
    pub async fn shutdown(&self) {
        let monitor = self.monitor.lock().await.take();
        let Some(monitor) = monitor else {
            debug!("Shutdown requested but orchestrator is not running");
            return;
        };

        monitor.stop().await;
        self.registry.persist_all();
        self.running.store(false, Ordering::SeqCst);
        info!(services = self.registry.len(), "Orchestrator stopped");
    }

    /// Run one polling tick immediately. `None` when not running.
    pub async fn poll_once(&self) -> Option<TickSummary> {
        let monitor = self.monitor.lock().await.clone()?;
        Some(monitor.tick().await)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_all_services(&self) -> Vec<ServiceView> {
        let now = self.registry.clock().now();
        self.registry
            .get_all()
            .iter()
            .map(|s| ServiceView::from_service(s, now))
            .collect()
    }

    pub fn get_service(&self, name: &str) -> Option<ServiceView> {
        let service = self.registry.get(name)?;
        Some(ServiceView::from_service(&service, self.registry.clock().now()))
    }

    /// Number of services in each status; every status is present
    pub fn status_summary(&self) -> HashMap<ContainerServiceStatus, usize> {
        let mut counts: HashMap<ContainerServiceStatus, usize> = ContainerServiceStatus::ALL
            .into_iter()
            .map(|status| (status, 0))
            .collect();
        for service in self.registry.get_all() {
            *counts.entry(service.status).or_insert(0) += 1;
        }
        counts
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Operator restart. Not idempotent: every call is one more attempt.
    pub async fn restart_service(&self, name: &str, reset_failures: bool) -> bool {
        if !self.registry.contains(name) {
            warn!(service = %name, "Restart requested for unknown service");
            return false;
        }

        let initiated = if reset_failures {
            "Restart initiated (failure counters reset)"
        } else {
            "Restart initiated"
        };
        self.events.emit(name, initiated);

        let ok = self.lifecycle.manual_restart(name, reset_failures).await;
        self.events
            .emit(name, if ok { "Restart succeeded" } else { "Restart failed" });
        ok
    }

    /// Start a stopped container
    pub async fn start_service(&self, name: &str) -> bool {
        if !self.registry.contains(name) {
            warn!(service = %name, "Start requested for unknown service");
            return false;
        }

        self.events.emit(name, "Start initiated");
        let ok = self.lifecycle.start_service(name).await;
        self.events
            .emit(name, if ok { "Start succeeded" } else { "Start failed" });
        ok
    }

    /// Re-arm auto-healing. Idempotent.
    pub fn enable_service(&self, name: &str) -> bool {
        if !self.registry.contains(name) {
            return false;
        }
        self.events.emit(name, "Enable requested");
        let ok = self.lifecycle.enable_service(name);
        self.events.emit(name, "Auto-healing enabled");
        ok
    }

    /// Suppress auto-restarts; the container keeps running. Idempotent.
    pub fn disable_service(&self, name: &str) -> bool {
        if !self.registry.contains(name) {
            return false;
        }
        self.events.emit(name, "Disable requested");
        let ok = self.lifecycle.disable_service(name);
        self.events.emit(name, "Auto-healing disabled by operator");
        ok
    }

    /// Re-run discovery: refresh container ids and images of known services
    /// and register any newly matched ones. Returns how many were added.
    pub async fn rediscover(&self) -> Result<usize, OrchestratorError> {
        let discovered = discover_all(self.runtime.as_ref(), &self.catalog).await?;

        let mut added = 0;
        for mut service in discovered {
            let name = service.name.clone();
            if self.registry.contains(&name) {
                self.registry
                    .update_container_id(&name, service.container_id.take());
                self.registry.update_image(&name, service.image.take());
                debug!(service = %name, "Refreshed container binding");
            } else {
                service.status = ContainerServiceStatus::Running;
                self.registry.register(service);
                self.registry.load_state(&name);
                self.events.emit(&name, "Service discovered");
                added += 1;
            }
        }

        info!(added, total = self.registry.len(), "Rediscovery complete");
        Ok(added)
    }
}
