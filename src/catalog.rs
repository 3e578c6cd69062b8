//! Service Catalog
//!
//! Static table mapping a catalog key ("postgres", "ai-detector", ...) to its
//! `ServiceConfig`. The built-in table can be extended or overridden from the
//! `[services.<key>]` sections of the config file.

use std::collections::BTreeMap;

use crate::types::{ServiceCategory, ServiceConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCatalog {
    entries: BTreeMap<String, ServiceConfig>,
}

impl ServiceCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The services this orchestrator ships with
    pub fn builtin() -> Self {
        let mut catalog = Self::new();

        // Infrastructure
        catalog.insert(
            "postgres",
            ServiceConfig::new("PostgreSQL", ServiceCategory::Infrastructure, 5432)
                .with_cmd("pg_isready -U postgres"),
        );
        catalog.insert(
            "redis",
            ServiceConfig::new("Redis", ServiceCategory::Infrastructure, 6379)
                .with_cmd("redis-cli ping"),
        );

        // AI models
        catalog.insert(
            "ai-detector",
            ServiceConfig::new("AI Detector", ServiceCategory::AI, 8090).with_endpoint("/health"),
        );
        catalog.insert(
            "ai-classifier",
            ServiceConfig::new("AI Classifier", ServiceCategory::AI, 8091)
                .with_endpoint("/health"),
        );

        // Monitoring
        catalog.insert(
            "redis-exporter",
            ServiceConfig::new("Redis Exporter", ServiceCategory::Monitoring, 9121)
                .with_endpoint("/metrics"),
        );
        catalog.insert(
            "prometheus",
            ServiceConfig::new("Prometheus", ServiceCategory::Monitoring, 9090)
                .with_endpoint("/-/healthy"),
        );
        catalog.insert(
            "grafana",
            ServiceConfig::new("Grafana", ServiceCategory::Monitoring, 3000)
                .with_endpoint("/api/health"),
        );

        catalog
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, key: &str, config: ServiceConfig) {
        self.entries.insert(key.to_string(), config);
    }

    /// Apply `[services.<key>]` overrides on top of this catalog
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, ServiceConfig>) -> Self {
        for (key, config) in overrides {
            self.insert(key, config.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&ServiceConfig> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceConfig)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a container name to a catalog key.
    ///
    /// Every key that is a substring of `container_name` is a candidate and the
    /// longest one wins, so "stack-redis-exporter-1" resolves to
    /// "redis-exporter" rather than "redis". Matching is case-sensitive. Among
    /// equal-length candidates the lexicographically smallest key wins.
    pub fn match_container_name(&self, container_name: &str) -> Option<&str> {
        self.keys()
            .filter(|key| container_name.contains(key))
            .fold(None, |best: Option<&str>, key| match best {
                Some(b) if b.len() >= key.len() => Some(b),
                _ => Some(key),
            })
    }
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
