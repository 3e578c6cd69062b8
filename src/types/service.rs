//! Core service types: ServiceCategory, ContainerServiceStatus, ServiceConfig, ManagedService

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Service Category
// ============================================================================

/// Broad family a catalog entry belongs to.
///
/// Only drives default policy values (grace period, failure budget, backoff);
/// it never gates behavior directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    Infrastructure,
    #[serde(rename = "ai")]
    AI,
    Monitoring,
}

impl ServiceCategory {
    /// Lowercase wire name ("infrastructure", "ai", "monitoring")
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Infrastructure => "infrastructure",
            ServiceCategory::AI => "ai",
            ServiceCategory::Monitoring => "monitoring",
        }
    }
}

impl std::fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Container Service Status
// ============================================================================

/// Lifecycle state of a managed service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContainerServiceStatus {
    Running,
    Starting,
    Unhealthy,
    Stopped,
    Disabled,
    #[default]
    NotFound,
}

impl ContainerServiceStatus {
    pub const ALL: [ContainerServiceStatus; 6] = [
        ContainerServiceStatus::Running,
        ContainerServiceStatus::Starting,
        ContainerServiceStatus::Unhealthy,
        ContainerServiceStatus::Stopped,
        ContainerServiceStatus::Disabled,
        ContainerServiceStatus::NotFound,
    ];

    /// Lowercase wire name, as persisted and broadcast
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerServiceStatus::Running => "running",
            ContainerServiceStatus::Starting => "starting",
            ContainerServiceStatus::Unhealthy => "unhealthy",
            ContainerServiceStatus::Stopped => "stopped",
            ContainerServiceStatus::Disabled => "disabled",
            ContainerServiceStatus::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for ContainerServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContainerServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown service status '{s}'"))
    }
}

// ============================================================================
// Service Config (catalog entry)
// ============================================================================

/// Immutable catalog entry describing how a service is probed and healed.
///
/// If both `health_endpoint` and `health_cmd` are set, the HTTP probe wins.
/// With neither, the runtime-reported container status is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub display_name: String,
    pub category: ServiceCategory,
    pub port: u16,
    #[serde(default)]
    pub health_endpoint: Option<String>,
    #[serde(default)]
    pub health_cmd: Option<String>,
    /// Seconds after a restart during which probing is suppressed
    pub startup_grace_period: u64,
    pub max_failures: u32,
    /// Seconds
    pub restart_backoff_base: f64,
    /// Seconds
    pub restart_backoff_max: f64,
}

impl ServiceConfig {
    /// Build an entry using the category's default policy values.
    pub fn new(display_name: &str, category: ServiceCategory, port: u16) -> Self {
        let policy = CategoryPolicy::for_category(category);
        Self {
            display_name: display_name.to_string(),
            category,
            port,
            health_endpoint: None,
            health_cmd: None,
            startup_grace_period: policy.startup_grace_period,
            max_failures: policy.max_failures,
            restart_backoff_base: policy.restart_backoff_base,
            restart_backoff_max: policy.restart_backoff_max,
        }
    }

    pub fn with_endpoint(mut self, path: &str) -> Self {
        self.health_endpoint = Some(path.to_string());
        self
    }

    pub fn with_cmd(mut self, cmd: &str) -> Self {
        self.health_cmd = Some(cmd.to_string());
        self
    }
}

/// Default policy values per category
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryPolicy {
    pub startup_grace_period: u64,
    pub max_failures: u32,
    pub restart_backoff_base: f64,
    pub restart_backoff_max: f64,
}

impl CategoryPolicy {
    pub fn for_category(category: ServiceCategory) -> Self {
        match category {
            ServiceCategory::Infrastructure => Self {
                startup_grace_period: 30,
                max_failures: 5,
                restart_backoff_base: 5.0,
                restart_backoff_max: 300.0,
            },
            // Model servers load weights on boot, so they get a long grace window
            ServiceCategory::AI => Self {
                startup_grace_period: 90,
                max_failures: 3,
                restart_backoff_base: 5.0,
                restart_backoff_max: 300.0,
            },
            ServiceCategory::Monitoring => Self {
                startup_grace_period: 30,
                max_failures: 5,
                restart_backoff_base: 10.0,
                restart_backoff_max: 600.0,
            },
        }
    }
}

// ============================================================================
// Managed Service (the aggregate)
// ============================================================================

/// A discovered (or recovered) service under orchestrator control.
///
/// The registry hands out clones of this struct; mutation only happens
/// through `ServiceRegistry` methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedService {
    // Identity
    pub name: String,
    pub display_name: String,
    pub container_id: Option<String>,
    pub image: Option<String>,
    pub port: u16,
    pub health_endpoint: Option<String>,
    pub health_cmd: Option<String>,
    pub category: ServiceCategory,

    // Runtime state
    pub status: ContainerServiceStatus,
    pub enabled: bool,

    // Self-healing counters
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,

    // Policy (copied from the catalog entry, may diverge per instance)
    pub max_failures: u32,
    pub restart_backoff_base: f64,
    pub restart_backoff_max: f64,
    pub startup_grace_period: u64,
}

impl ManagedService {
    /// Create a service from its catalog entry with runtime fields at their defaults.
    pub fn from_config(name: &str, config: &ServiceConfig) -> Self {
        Self {
            name: name.to_string(),
            display_name: config.display_name.clone(),
            container_id: None,
            image: None,
            port: config.port,
            health_endpoint: config.health_endpoint.clone(),
            health_cmd: config.health_cmd.clone(),
            category: config.category,
            status: ContainerServiceStatus::NotFound,
            enabled: true,
            failure_count: 0,
            last_failure_at: None,
            restart_count: 0,
            last_restart_at: None,
            max_failures: config.max_failures,
            restart_backoff_base: config.restart_backoff_base,
            restart_backoff_max: config.restart_backoff_max,
            startup_grace_period: config.startup_grace_period,
        }
    }

    pub fn with_container(mut self, container_id: &str, image: &str) -> Self {
        self.container_id = Some(container_id.to_string());
        self.image = Some(image.to_string());
        self
    }

    /// True while `now` is inside the post-restart grace window.
    pub fn in_grace_period(&self, now: DateTime<Utc>) -> bool {
        match self.last_restart_at {
            Some(restarted) => {
                let grace = chrono::Duration::seconds(
                    i64::try_from(self.startup_grace_period).unwrap_or(i64::MAX),
                );
                now.signed_duration_since(restarted) < grace
            }
            None => false,
        }
    }

    /// True once the failure budget is spent.
    pub fn failure_budget_exhausted(&self) -> bool {
        self.failure_count >= self.max_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_wire_names_roundtrip() {
        for status in ContainerServiceStatus::ALL {
            let parsed: ContainerServiceStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::json!(status.as_str()));
        }
        assert!("exploded".parse::<ContainerServiceStatus>().is_err());
    }

    #[test]
    fn category_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ServiceCategory::AI).unwrap(), "ai");
        assert_eq!(
            serde_json::to_value(ServiceCategory::Infrastructure).unwrap(),
            "infrastructure"
        );
        let parsed: ServiceCategory = serde_json::from_str("\"monitoring\"").unwrap();
        assert_eq!(parsed, ServiceCategory::Monitoring);
    }

    #[test]
    fn from_config_copies_policy() {
        let config = ServiceConfig::new("AI Detector", ServiceCategory::AI, 8090)
            .with_endpoint("/health");
        let svc = ManagedService::from_config("ai-detector", &config);

        assert_eq!(svc.status, ContainerServiceStatus::NotFound);
        assert!(svc.enabled);
        assert_eq!(svc.max_failures, 3);
        assert_eq!(svc.restart_backoff_base, 5.0);
        assert_eq!(svc.health_endpoint.as_deref(), Some("/health"));
        assert!(svc.container_id.is_none());
    }

    #[test]
    fn grace_period_window() {
        let config = ServiceConfig::new("Postgres", ServiceCategory::Infrastructure, 5432);
        let mut svc = ManagedService::from_config("postgres", &config);
        let now = Utc::now();
        assert!(!svc.in_grace_period(now));

        svc.last_restart_at = Some(now);
        assert!(svc.in_grace_period(now + Duration::seconds(29)));
        assert!(!svc.in_grace_period(now + Duration::seconds(30)));
    }
}
