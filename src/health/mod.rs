//! Health checking: per-service probes and the polling monitor

pub mod monitor;
pub mod probe;

pub use monitor::{HealthListener, HealthMonitor, MonitorSettings, TickSummary};
pub use probe::{container_status, probe_service, HttpProber, ProbeOutcome};
