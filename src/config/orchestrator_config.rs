//! Orchestrator Configuration - polling, timeouts, persistence and catalog overrides
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working orchestrator against the built-in catalog.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;
use crate::catalog::ServiceCatalog;
use crate::types::{CategoryPolicy, ServiceCategory, ServiceConfig};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `OrchestratorConfig::load()` which searches:
/// 1. `$DOCK_MEDIC_CONFIG` env var
/// 2. `./dock_medic.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// `[services.<key>]` tables: overrides of, or additions to, the built-in catalog
    #[serde(default)]
    pub services: BTreeMap<String, ServiceOverride>,
}

impl OrchestratorConfig {
    /// Load configuration using the standard search order:
    /// 1. `$DOCK_MEDIC_CONFIG` environment variable
    /// 2. `./dock_medic.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", defaults::CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        // 2. Check ./dock_medic.toml
        let local = PathBuf::from(defaults::LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", defaults::LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::LOCAL_CONFIG_FILE);
                }
            }
        }

        // 3. Defaults
        info!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        // Unknown keys are reported but never fatal
        for key in unknown_orchestrator_keys(&contents) {
            warn!(key = %key, "Unknown key in [orchestrator], ignored");
        }

        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate TOML held in memory.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Built-in catalog with every `[services.<key>]` override applied.
    pub fn catalog(&self) -> Result<ServiceCatalog, ConfigError> {
        let base = ServiceCatalog::builtin();
        let mut resolved = BTreeMap::new();
        let mut errors = Vec::new();

        for (key, entry) in &self.services {
            match entry.resolve(key, base.get(key)) {
                Ok(config) => {
                    resolved.insert(key.clone(), config);
                }
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(base.with_overrides(&resolved))
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Validate every setting and every resolved catalog entry.
    ///
    /// All problems are collected so the operator sees them in one pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let o = &self.orchestrator;
        let mut errors: Vec<String> = Vec::new();

        if o.poll_interval_secs == 0 {
            errors.push("orchestrator.poll_interval_secs must be > 0".to_string());
        }
        if o.probe_timeout_secs == 0 {
            errors.push("orchestrator.probe_timeout_secs must be > 0".to_string());
        }
        if o.stop_timeout_secs == 0 {
            errors.push("orchestrator.stop_timeout_secs must be > 0".to_string());
        }
        if o.event_channel_capacity == 0 {
            errors.push("orchestrator.event_channel_capacity must be > 0".to_string());
        }
        if o.health_host.trim().is_empty() {
            errors.push("orchestrator.health_host must not be empty".to_string());
        }

        match self.catalog() {
            Ok(catalog) => {
                for (key, config) in catalog.iter() {
                    Self::check_service(key, config, &mut errors);
                }
            }
            Err(ConfigError::Validation(resolve_errors)) => errors.extend(resolve_errors),
            Err(e) => errors.push(e.to_string()),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_service(key: &str, config: &ServiceConfig, errors: &mut Vec<String>) {
        let base = config.restart_backoff_base;
        let max = config.restart_backoff_max;

        // NaN/Inf comparisons silently pass, catch them explicitly
        if !base.is_finite() || !max.is_finite() {
            errors.push(format!(
                "services.{key}: backoff values must be finite (got base={base}, max={max})"
            ));
            return;
        }
        if base <= 0.0 {
            errors.push(format!("services.{key}.restart_backoff_base must be > 0 (got {base})"));
        }
        if max < base {
            errors.push(format!(
                "services.{key}.restart_backoff_max ({max}) must be >= restart_backoff_base ({base})"
            ));
        }
        if config.max_failures == 0 {
            errors.push(format!("services.{key}.max_failures must be > 0"));
        }
        if config.port == 0 {
            errors.push(format!("services.{key}.port must be > 0"));
        }
    }
}

// ============================================================================
// [orchestrator]
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// When false, `Orchestrator::start` is a no-op
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub health_host: String,
    pub state_db_path: String,
    pub event_channel_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: defaults::POLL_INTERVAL_SECS,
            probe_timeout_secs: defaults::PROBE_TIMEOUT_SECS,
            stop_timeout_secs: defaults::STOP_TIMEOUT_SECS,
            health_host: defaults::HEALTH_HOST.to_string(),
            state_db_path: defaults::STATE_DB_PATH.to_string(),
            event_channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl OrchestratorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

const ORCHESTRATOR_KEYS: &[&str] = &[
    "enabled",
    "poll_interval_secs",
    "probe_timeout_secs",
    "stop_timeout_secs",
    "health_host",
    "state_db_path",
    "event_channel_capacity",
];

/// Keys under `[orchestrator]` that no field consumes (typos, removed settings).
pub fn unknown_orchestrator_keys(contents: &str) -> Vec<String> {
    let Ok(toml::Value::Table(root)) = contents.parse::<toml::Value>() else {
        return Vec::new();
    };
    let Some(toml::Value::Table(section)) = root.get("orchestrator") else {
        return Vec::new();
    };
    section
        .keys()
        .filter(|k| !ORCHESTRATOR_KEYS.contains(&k.as_str()))
        .map(|k| format!("orchestrator.{k}"))
        .collect()
}

// ============================================================================
// [services.<key>]
// ============================================================================

/// One `[services.<key>]` table. Every field is optional: unset fields fall
/// back to the built-in entry for the same key, then to the category's
/// default policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOverride {
    pub display_name: Option<String>,
    pub category: Option<ServiceCategory>,
    pub port: Option<u16>,
    pub health_endpoint: Option<String>,
    pub health_cmd: Option<String>,
    pub startup_grace_period: Option<u64>,
    pub max_failures: Option<u32>,
    pub restart_backoff_base: Option<f64>,
    pub restart_backoff_max: Option<f64>,
}

impl ServiceOverride {
    /// Merge onto `base` (the built-in entry, if any) to produce a full entry.
    ///
    /// New keys must name at least a category and a port.
    pub fn resolve(&self, key: &str, base: Option<&ServiceConfig>) -> Result<ServiceConfig, String> {
        let mut config = match base {
            Some(existing) => {
                let mut config = existing.clone();
                // A category change re-seeds the policy defaults
                if let Some(category) = self.category.filter(|c| *c != existing.category) {
                    let policy = CategoryPolicy::for_category(category);
                    config.category = category;
                    config.startup_grace_period = policy.startup_grace_period;
                    config.max_failures = policy.max_failures;
                    config.restart_backoff_base = policy.restart_backoff_base;
                    config.restart_backoff_max = policy.restart_backoff_max;
                }
                config
            }
            None => {
                let category = self
                    .category
                    .ok_or_else(|| format!("services.{key}: new service needs a category"))?;
                let port = self
                    .port
                    .ok_or_else(|| format!("services.{key}: new service needs a port"))?;
                ServiceConfig::new(key, category, port)
            }
        };

        if let Some(name) = &self.display_name {
            config.display_name = name.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        // An HTTP endpoint and a command may both be set; the endpoint is probed first
        if let Some(path) = &self.health_endpoint {
            config.health_endpoint = Some(path.clone());
        }
        if let Some(cmd) = &self.health_cmd {
            config.health_cmd = Some(cmd.clone());
        }
        if let Some(v) = self.startup_grace_period {
            config.startup_grace_period = v;
        }
        if let Some(v) = self.max_failures {
            config.max_failures = v;
        }
        if let Some(v) = self.restart_backoff_base {
            config.restart_backoff_base = v;
        }
        if let Some(v) = self.restart_backoff_max {
            config.restart_backoff_max = v;
        }
        Ok(config)
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.orchestrator.enabled);
        assert_eq!(config.orchestrator.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.catalog().unwrap().len(), 7);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn partial_orchestrator_section() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
[orchestrator]
poll_interval_secs = 3
health_host = "127.0.0.1"
"#,
        )
        .unwrap();
        assert_eq!(config.orchestrator.poll_interval_secs, 3);
        assert_eq!(config.orchestrator.health_host, "127.0.0.1");
        assert_eq!(config.orchestrator.probe_timeout_secs, defaults::PROBE_TIMEOUT_SECS);
    }

    #[test]
    fn service_override_merges_onto_builtin() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
[services.ai-detector]
max_failures = 4
port = 18090
"#,
        )
        .unwrap();
        let catalog = config.catalog().unwrap();
        let detector = catalog.get("ai-detector").unwrap();
        assert_eq!(detector.max_failures, 4);
        assert_eq!(detector.port, 18090);
        assert_eq!(detector.health_endpoint.as_deref(), Some("/health"));
        assert_eq!(detector.startup_grace_period, 90);
    }

    #[test]
    fn new_service_uses_category_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
[services.loki]
display_name = "Loki"
category = "monitoring"
port = 3100
health_endpoint = "/ready"
"#,
        )
        .unwrap();
        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.len(), 8);
        let loki = catalog.get("loki").unwrap();
        assert_eq!(loki.display_name, "Loki");
        assert_eq!(loki.restart_backoff_base, 10.0);
        assert_eq!(loki.restart_backoff_max, 600.0);
    }

    #[test]
    fn new_service_without_port_rejected() {
        let err = OrchestratorConfig::from_toml_str(
            r#"
[services.loki]
category = "monitoring"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("new service needs a port"));
    }

    #[test]
    fn validation_collects_all_errors() {
        let err = OrchestratorConfig::from_toml_str(
            r#"
[orchestrator]
poll_interval_secs = 0
probe_timeout_secs = 0

[services.redis]
max_failures = 0
restart_backoff_base = 20.0
restart_backoff_max = 10.0
"#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert_eq!(errors.len(), 4, "{errors:?}");
            }
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn non_finite_backoff_rejected() {
        let mut config = OrchestratorConfig::default();
        config.services.insert(
            "redis".to_string(),
            ServiceOverride {
                restart_backoff_base: Some(f64::NAN),
                ..Default::default()
            },
        );
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn unknown_keys_reported() {
        let keys = unknown_orchestrator_keys(
            r#"
[orchestrator]
pol_interval_secs = 5
enabled = true
"#,
        );
        assert_eq!(keys, vec!["orchestrator.pol_interval_secs"]);
    }

    #[test]
    fn load_from_file_and_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestrator]\nstop_timeout_secs = 20\nenabled = false").unwrap();

        let config = OrchestratorConfig::load_from_file(file.path()).unwrap();
        assert!(!config.orchestrator.enabled);
        assert_eq!(config.orchestrator.stop_timeout(), Duration::from_secs(20));

        let reparsed = OrchestratorConfig::from_toml_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = OrchestratorConfig::load_from_file(Path::new("/nonexistent/dock_medic.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
