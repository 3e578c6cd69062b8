//! Read-only service view handed upward to the API layer and embedded in events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ContainerServiceStatus, ManagedService, ServiceCategory};

/// Length of the short container id exposed outside the registry
pub const SHORT_ID_LEN: usize = 12;

/// Fixed-shape snapshot of a managed service.
///
/// Decouples consumers from `ManagedService` internals: the registry keeps the
/// full container id, the view exposes the 12-character short form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceView {
    pub name: String,
    pub display_name: String,
    pub category: ServiceCategory,
    pub status: ContainerServiceStatus,
    pub enabled: bool,
    pub container_id: Option<String>,
    pub image: Option<String>,
    pub port: u16,
    pub failure_count: u32,
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
    pub uptime_seconds: Option<i64>,
}

impl ServiceView {
    /// Project a service as seen at `now`.
    ///
    /// `uptime_seconds` is only reported for running services with a known
    /// restart timestamp.
    pub fn from_service(service: &ManagedService, now: DateTime<Utc>) -> Self {
        let uptime_seconds = match (service.status, service.last_restart_at) {
            (ContainerServiceStatus::Running, Some(restarted)) => {
                Some(now.signed_duration_since(restarted).num_seconds().max(0))
            }
            _ => None,
        };

        Self {
            name: service.name.clone(),
            display_name: service.display_name.clone(),
            category: service.category,
            status: service.status,
            enabled: service.enabled,
            container_id: service.container_id.as_deref().map(short_id),
            image: service.image.clone(),
            port: service.port,
            failure_count: service.failure_count,
            restart_count: service.restart_count,
            last_restart_at: service.last_restart_at,
            uptime_seconds,
        }
    }
}

/// Truncate a container id to its short form.
pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceConfig;
    use chrono::Duration;

    fn service() -> ManagedService {
        let config = ServiceConfig::new("Redis", ServiceCategory::Infrastructure, 6379);
        ManagedService::from_config("redis", &config)
            .with_container("0123456789abcdef0123456789abcdef", "redis:7")
    }

    #[test]
    fn container_id_is_shortened() {
        let view = ServiceView::from_service(&service(), Utc::now());
        assert_eq!(view.container_id.as_deref(), Some("0123456789ab"));
        assert_eq!(view.image.as_deref(), Some("redis:7"));
    }

    #[test]
    fn uptime_only_when_running() {
        let now = Utc::now();
        let mut svc = service();
        svc.last_restart_at = Some(now - Duration::seconds(3600));

        svc.status = ContainerServiceStatus::Unhealthy;
        assert_eq!(ServiceView::from_service(&svc, now).uptime_seconds, None);

        svc.status = ContainerServiceStatus::Running;
        assert_eq!(ServiceView::from_service(&svc, now).uptime_seconds, Some(3600));

        svc.last_restart_at = None;
        assert_eq!(ServiceView::from_service(&svc, now).uptime_seconds, None);
    }
}
