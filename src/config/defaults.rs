//! Default values for every `[orchestrator]` setting.
//!
//! Grouped by subsystem so the config structs and the binary agree.

// ============================================================================
// Health Monitor
// ============================================================================

/// Interval between polling ticks (seconds).
pub const POLL_INTERVAL_SECS: u64 = 15;

/// Upper bound on a single probe, HTTP or exec (seconds).
pub const PROBE_TIMEOUT_SECS: u64 = 5;

/// Host used to build HTTP probe URLs. Service ports are published on it.
pub const HEALTH_HOST: &str = "localhost";

// ============================================================================
// Lifecycle
// ============================================================================

/// Graceful stop bound used by the restart sequence (seconds).
pub const STOP_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Persistence and events
// ============================================================================

/// sled database directory for per-service state.
pub const STATE_DB_PATH: &str = "./data/orchestrator_state";

/// Buffered events per subscriber before slow subscribers start lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Config discovery
// ============================================================================

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "DOCK_MEDIC_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "dock_medic.toml";
