//! dock-medic: container self-healing orchestrator
//!
//! Keeps a fixed set of known service containers healthy on a single host.
//!
//! ## Architecture
//!
//! - **Catalog / Discovery**: map live container names to known services
//! - **Registry**: mutex-guarded service table with per-service persisted state
//! - **Health Monitor**: fixed-interval HTTP / exec / status probes
//! - **Lifecycle Manager**: exponential backoff, restarts and the failure circuit breaker
//! - **Orchestrator**: startup/shutdown sequencing, operator commands, event fan-out

pub mod catalog;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, OrchestratorConfig, OrchestratorSettings};

// Re-export commonly used types
pub use types::{
    ContainerServiceStatus, ManagedService, ServiceCategory, ServiceConfig, ServiceEvent,
    ServiceView,
};

// Re-export components
pub use catalog::ServiceCatalog;
pub use error::OrchestratorError;
pub use events::{ChannelBroadcaster, EventBroadcaster};
pub use health::{HealthMonitor, ProbeOutcome};
pub use lifecycle::{backoff, HealAction, LifecycleManager};
pub use orchestrator::Orchestrator;
pub use registry::ServiceRegistry;
