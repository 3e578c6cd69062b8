//! Health Monitor: fixed-interval polling loop over every registered service
//!
//! One background task runs the loop. Within a tick all services are probed
//! concurrently and the tick completes only when every check has finished, so
//! the same service is never polled twice at once. Each probe is bounded by
//! `probe_timeout`.
//!
//! Failure counting is not done here: the monitor records status and reports
//! edges to its `HealthListener`, which owns the healing policy.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::probe::{probe_service, HttpProber, ProbeOutcome};
use crate::registry::ServiceRegistry;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerServiceStatus, ManagedService};

/// Receives health edges: every transition to healthy, and every unhealthy poll.
#[async_trait]
pub trait HealthListener: Send + Sync {
    /// `service` is the registry snapshot after the status update
    async fn on_health_change(&self, service: &ManagedService, healthy: bool);
}

/// Polling parameters
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    /// Host used for HTTP probes
    pub health_host: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(crate::config::defaults::POLL_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(crate::config::defaults::PROBE_TIMEOUT_SECS),
            health_host: crate::config::defaults::HEALTH_HOST.to_string(),
        }
    }
}

/// Counts from one polling tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub probed: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub skipped: usize,
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    listener: Arc<dyn HealthListener>,
    http: HttpProber,
    settings: MonitorSettings,
    ticks: AtomicU64,
    handle: Mutex<Option<LoopHandle>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        listener: Arc<dyn HealthListener>,
        settings: MonitorSettings,
    ) -> Self {
        let http = HttpProber::new(&settings.health_host, settings.probe_timeout);
        Self {
            registry,
            runtime,
            listener,
            http,
            settings,
            ticks: AtomicU64::new(0),
            handle: Mutex::new(None),
        }
    }

    /// Number of completed polling ticks
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Spawn the polling loop. Returns false if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let monitor = Arc::clone(self);
        let task = tokio::spawn(async move {
            monitor.run(token).await;
        });

        *handle = Some(LoopHandle { cancel, task });
        true
    }

    /// Stop the loop, letting an in-flight tick run to completion.
    pub async fn stop(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(LoopHandle { cancel, task }) = handle {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!(error = %e, "Health monitor task ended abnormally");
            }
            info!(ticks = self.ticks(), "Health monitor stopped");
        }
    }

    async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            probe_timeout_secs = self.settings.probe_timeout.as_secs(),
            "Health monitor started"
        );

        // First poll one interval after start; discovery has just seeded every status
        let period = self.settings.poll_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // Not raced against cancellation: a started tick always finishes
            self.tick().await;
        }
    }

    /// Run one polling cycle over every registered service.
    pub async fn tick(&self) -> TickSummary {
        let services = self.registry.get_all();
        let outcomes = join_all(services.into_iter().map(|svc| self.check_service(svc))).await;

        let mut summary = TickSummary::default();
        for outcome in &outcomes {
            match outcome {
                ProbeOutcome::Healthy => {
                    summary.probed += 1;
                    summary.healthy += 1;
                }
                ProbeOutcome::Unhealthy { .. } => {
                    summary.probed += 1;
                    summary.unhealthy += 1;
                }
                ProbeOutcome::GracePeriod => summary.skipped += 1,
            }
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        debug!(
            probed = summary.probed,
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            skipped = summary.skipped,
            "Health tick complete"
        );
        summary
    }

    /// Probe one service and apply the resulting transition.
    async fn check_service(&self, service: ManagedService) -> ProbeOutcome {
        let now = self.registry.clock().now();
        if service.in_grace_period(now) {
            debug!(service = %service.name, "In startup grace period, skipping probe");
            return ProbeOutcome::GracePeriod;
        }

        let outcome = match tokio::time::timeout(
            self.settings.probe_timeout,
            probe_service(self.runtime.as_ref(), &self.http, &service),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::unhealthy("probe timed out", ContainerServiceStatus::Unhealthy),
        };

        // Disabled services are probed for visibility only
        if !service.enabled {
            debug!(service = %service.name, outcome = %outcome, "Probed disabled service");
            return outcome;
        }

        match &outcome {
            ProbeOutcome::Healthy => {
                if service.status != ContainerServiceStatus::Running {
                    self.registry.reset_failures(&service.name);
                    self.registry
                        .update_status(&service.name, ContainerServiceStatus::Running);
                    self.registry.persist_state(&service.name);
                    info!(service = %service.name, previous = %service.status, "Service healthy");
                    self.notify(&service.name, true).await;
                } else {
                    debug!(service = %service.name, "Service healthy");
                }
            }
            ProbeOutcome::Unhealthy { reason, status } => {
                warn!(service = %service.name, status = %status, reason = %reason, "Health check failed");
                self.registry.update_status(&service.name, *status);
                self.registry.persist_state(&service.name);
                self.notify(&service.name, false).await;
            }
            ProbeOutcome::GracePeriod => {}
        }

        outcome
    }

    async fn notify(&self, name: &str, healthy: bool) {
        if let Some(snapshot) = self.registry.get(name) {
            self.listener.on_health_change(&snapshot, healthy).await;
        }
    }
}
