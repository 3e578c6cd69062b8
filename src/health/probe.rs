//! Health probes: HTTP GET, exec-in-container, runtime status fallback

use std::time::Duration;

use crate::runtime::ContainerRuntime;
use crate::types::{ContainerServiceStatus, ManagedService};

/// Result of a single poll of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    /// `status` is what the registry should record: `Unhealthy` when the
    /// container runs but fails its check, `Stopped` when it exists but is not
    /// running, `NotFound` when the runtime no longer knows it.
    Unhealthy {
        reason: String,
        status: ContainerServiceStatus,
    },
    /// Inside the post-restart grace window; not probed
    GracePeriod,
}

impl ProbeOutcome {
    pub fn unhealthy(reason: impl Into<String>, status: ContainerServiceStatus) -> Self {
        ProbeOutcome::Unhealthy {
            reason: reason.into(),
            status,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Healthy => write!(f, "HEALTHY"),
            ProbeOutcome::Unhealthy { reason, status } => {
                write!(f, "UNHEALTHY ({}): {}", status, reason)
            }
            ProbeOutcome::GracePeriod => write!(f, "GRACE PERIOD"),
        }
    }
}

/// HTTP GET prober. 2xx and 3xx count as healthy.
#[derive(Clone)]
pub struct HttpProber {
    http: reqwest::Client,
    host: String,
}

impl HttpProber {
    pub fn new(host: &str, timeout: Duration) -> Self {
        // Redirects are reported as-is so a 3xx counts as healthy
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build probe HTTP client, using defaults");
                reqwest::Client::new()
            });

        Self {
            http,
            host: host.to_string(),
        }
    }

    pub fn url(&self, port: u16, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        format!("http://{}:{}{}", self.host, port, path)
    }

    /// `Err(reason)` on non-2xx/3xx, timeout or connection failure
    pub async fn check(&self, port: u16, path: &str) -> Result<(), String> {
        let url = self.url(port, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("GET {url} failed: {e}"))?;

        let status = resp.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(format!("GET {url} returned {status}"))
        }
    }
}

/// Map the runtime's view of a container to the status recorded after a
/// failed probe.
pub async fn container_status(
    runtime: &dyn ContainerRuntime,
    service: &ManagedService,
) -> ContainerServiceStatus {
    let Some(id) = service.container_id.as_deref() else {
        return ContainerServiceStatus::NotFound;
    };
    match runtime.status(id).await {
        Ok(None) => ContainerServiceStatus::NotFound,
        Ok(Some(state)) if state == "running" => ContainerServiceStatus::Unhealthy,
        Ok(Some(_)) => ContainerServiceStatus::Stopped,
        Err(e) => {
            tracing::debug!(service = %service.name, error = %e, "Runtime status lookup failed");
            ContainerServiceStatus::Unhealthy
        }
    }
}

/// Probe one service, choosing HTTP, exec or runtime status in that order.
///
/// Never fails: every transport error becomes `ProbeOutcome::Unhealthy`.
pub async fn probe_service(
    runtime: &dyn ContainerRuntime,
    http: &HttpProber,
    service: &ManagedService,
) -> ProbeOutcome {
    if let Some(path) = service.health_endpoint.as_deref() {
        return match http.check(service.port, path).await {
            Ok(()) => ProbeOutcome::Healthy,
            Err(reason) => ProbeOutcome::unhealthy(reason, container_status(runtime, service).await),
        };
    }

    let Some(id) = service.container_id.as_deref() else {
        return ProbeOutcome::unhealthy("no container id", ContainerServiceStatus::NotFound);
    };

    if let Some(cmd) = service.health_cmd.as_deref() {
        return match runtime.exec(id, cmd).await {
            Ok(0) => ProbeOutcome::Healthy,
            Ok(code) => ProbeOutcome::unhealthy(
                format!("`{cmd}` exited with {code}"),
                container_status(runtime, service).await,
            ),
            Err(e) => ProbeOutcome::unhealthy(
                format!("exec failed: {e}"),
                container_status(runtime, service).await,
            ),
        };
    }

    match runtime.status(id).await {
        Ok(Some(state)) if state == "running" => ProbeOutcome::Healthy,
        Ok(Some(state)) => ProbeOutcome::unhealthy(
            format!("container is {state}"),
            ContainerServiceStatus::Stopped,
        ),
        Ok(None) => ProbeOutcome::unhealthy("container not found", ContainerServiceStatus::NotFound),
        Err(e) => ProbeOutcome::unhealthy(
            format!("status lookup failed: {e}"),
            ContainerServiceStatus::Unhealthy,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeRuntime;
    use crate::types::{ServiceCategory, ServiceConfig};

    fn prober() -> HttpProber {
        HttpProber::new("127.0.0.1", Duration::from_millis(500))
    }

    fn service(config: ServiceConfig) -> ManagedService {
        ManagedService::from_config("redis", &config).with_container("c1", "redis:7")
    }

    #[test]
    fn url_building() {
        let p = HttpProber::new("localhost", Duration::from_secs(1));
        assert_eq!(p.url(8090, "/health"), "http://localhost:8090/health");
        assert_eq!(p.url(8090, "health"), "http://localhost:8090/health");
    }

    #[tokio::test]
    async fn exec_probe_exit_codes() {
        let runtime = FakeRuntime::new();
        runtime.add_container("c1", "x-redis-1", "running", &[]);
        let svc = service(
            ServiceConfig::new("Redis", ServiceCategory::Infrastructure, 6379).with_cmd("redis-cli ping"),
        );

        assert_eq!(probe_service(&runtime, &prober(), &svc).await, ProbeOutcome::Healthy);

        runtime.set_exec_exit_code("c1", 1);
        let outcome = probe_service(&runtime, &prober(), &svc).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Unhealthy { status: ContainerServiceStatus::Unhealthy, .. }
        ));

        runtime.set_status("c1", "exited");
        let outcome = probe_service(&runtime, &prober(), &svc).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Unhealthy { status: ContainerServiceStatus::Stopped, .. }
        ));
    }

    #[tokio::test]
    async fn status_fallback() {
        let runtime = FakeRuntime::new();
        runtime.add_container("c1", "x-redis-1", "running", &[]);
        let svc = service(ServiceConfig::new("Redis", ServiceCategory::Infrastructure, 6379));

        assert_eq!(probe_service(&runtime, &prober(), &svc).await, ProbeOutcome::Healthy);

        runtime.set_status("c1", "exited");
        assert!(matches!(
            probe_service(&runtime, &prober(), &svc).await,
            ProbeOutcome::Unhealthy { status: ContainerServiceStatus::Stopped, .. }
        ));

        runtime.remove_container("c1");
        assert!(matches!(
            probe_service(&runtime, &prober(), &svc).await,
            ProbeOutcome::Unhealthy { status: ContainerServiceStatus::NotFound, .. }
        ));
    }

    #[tokio::test]
    async fn http_connection_refused_is_unhealthy() {
        let runtime = FakeRuntime::new();
        runtime.add_container("c1", "x-redis-1", "running", &[]);

        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let svc = service(
            ServiceConfig::new("Redis", ServiceCategory::Infrastructure, port).with_endpoint("/health"),
        );

        let outcome = probe_service(&runtime, &prober(), &svc).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Unhealthy { status: ContainerServiceStatus::Unhealthy, .. }
        ));
        // HTTP takes precedence; nothing was exec'd
        assert_eq!(runtime.exec_count(), 0);
    }
}
