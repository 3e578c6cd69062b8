//! dock-medic - container self-healing orchestrator
//!
//! Discovers known service containers on the local Docker engine, polls their
//! health and restarts (or disables) them according to per-service policy.
//!
//! # Usage
//!
//! ```bash
//! # Against the local Docker engine
//! cargo run --release
//!
//! # Without Docker: in-memory runtime seeded with one container per catalog entry
//! cargo run --release -- --simulate
//!
//! # Explicit config file and faster polling
//! ./dock-medic --config ./dock_medic.toml --poll-interval 5
//! ```
//!
//! # Environment Variables
//!
//! - `DOCK_MEDIC_CONFIG`: Path to the TOML config file
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dock_medic::config::OrchestratorConfig;
use dock_medic::events::ChannelBroadcaster;
use dock_medic::runtime::{ContainerRuntime, FakeRuntime};
use dock_medic::storage::{InMemoryStateStore, SledStateStore, StateStore};
use dock_medic::{Orchestrator, ServiceCatalog};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "dock-medic")]
#[command(about = "Container self-healing orchestrator")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides DOCK_MEDIC_CONFIG and ./dock_medic.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the sled state database directory
    #[arg(long, value_name = "PATH")]
    state_db: Option<PathBuf>,

    /// Run against an in-memory runtime instead of Docker; state is not persisted
    #[arg(long)]
    simulate: bool,

    /// Override the health polling interval (seconds)
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Delete the persisted service state before starting.
    /// Counters and disabled flags from previous runs are lost.
    #[arg(long)]
    reset_state: bool,
}

// ============================================================================
// Wiring
// ============================================================================

fn load_config(args: &CliArgs) -> Result<OrchestratorConfig> {
    let mut config = match &args.config {
        Some(path) => OrchestratorConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => OrchestratorConfig::load(),
    };

    if let Some(secs) = args.poll_interval {
        config.orchestrator.poll_interval_secs = secs;
    }
    if let Some(path) = &args.state_db {
        config.orchestrator.state_db_path = path.display().to_string();
    }

    // CLI overrides go through the same checks as the file
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_store(path: &Path, simulate: bool, reset: bool) -> Result<Arc<dyn StateStore>> {
    if simulate {
        info!("Simulation mode: service state kept in memory");
        return Ok(Arc::new(InMemoryStateStore::new()));
    }

    if reset && path.exists() {
        warn!(path = %path.display(), "Resetting persisted service state");
        std::fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SledStateStore::open(path)
        .with_context(|| format!("Failed to open state database at {}", path.display()))?;
    info!(path = %path.display(), records = store.count(), "Opened state database");
    Ok(Arc::new(store))
}

/// Fake runtime with one running container per catalog entry.
fn simulated_runtime(catalog: &ServiceCatalog) -> FakeRuntime {
    let runtime = FakeRuntime::new();
    for (i, key) in catalog.keys().enumerate() {
        let id = format!("{:012x}{}", i + 1, "0".repeat(52));
        let name = format!("dock-medic-sim-{key}-1");
        let tag = format!("sim/{key}:latest");
        runtime.add_container(&id, &name, "running", &[tag.as_str()]);
    }
    runtime
}

/// Nothing listens on the service ports in simulation, so HTTP probes fall
/// back to the exec/status probes of the fake runtime.
fn simulated_catalog(catalog: &ServiceCatalog) -> ServiceCatalog {
    let mut simulated = ServiceCatalog::new();
    for (key, config) in catalog.iter() {
        let mut config = config.clone();
        config.health_endpoint = None;
        simulated.insert(key, config);
    }
    simulated
}

#[cfg(feature = "docker")]
fn docker_runtime() -> Result<Arc<dyn ContainerRuntime>> {
    let runtime = dock_medic::runtime::DockerRuntime::connect()
        .context("Failed to create Docker client")?;
    Ok(Arc::new(runtime))
}

#[cfg(not(feature = "docker"))]
fn docker_runtime() -> Result<Arc<dyn ContainerRuntime>> {
    anyhow::bail!("built without the `docker` feature; run with --simulate")
}

/// Log every broadcast event until cancelled.
fn spawn_event_logger(broadcaster: &ChannelBroadcaster, cancel: CancellationToken) {
    let mut rx = broadcaster.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(event) => info!(
                        service = %event.data.name,
                        status = %event.data.status,
                        enabled = event.data.enabled,
                        failures = event.data.failure_count,
                        restarts = event.data.restart_count,
                        "{}",
                        event.message
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event logger lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    let settings = config.orchestrator.clone();

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  dock-medic - container self-healing orchestrator");
    info!(
        "  Poll: {}s | Probe timeout: {}s | Stop timeout: {}s",
        settings.poll_interval_secs, settings.probe_timeout_secs, settings.stop_timeout_secs
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let catalog = config.catalog().context("Invalid service catalog")?;
    let store = open_store(Path::new(&settings.state_db_path), args.simulate, args.reset_state)?;

    let (runtime, catalog): (Arc<dyn ContainerRuntime>, ServiceCatalog) = if args.simulate {
        info!(containers = catalog.len(), "Simulation mode: in-memory container runtime");
        (Arc::new(simulated_runtime(&catalog)), simulated_catalog(&catalog))
    } else {
        (docker_runtime()?, catalog)
    };

    let broadcaster = ChannelBroadcaster::new(settings.event_channel_capacity);
    let cancel_token = CancellationToken::new();
    spawn_event_logger(&broadcaster, cancel_token.clone());

    let orchestrator = Orchestrator::new(
        settings,
        catalog,
        runtime,
        store,
        Arc::new(broadcaster),
    );

    orchestrator
        .start()
        .await
        .context("Orchestrator failed to start")?;
    if !orchestrator.is_running() {
        info!("Nothing to do, exiting");
        cancel_token.cancel();
        return Ok(());
    }

    // Graceful shutdown via Ctrl+C
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    cancel_token.cancelled().await;
    orchestrator.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
