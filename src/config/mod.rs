//! Orchestrator Configuration Module
//!
//! ## Loading Order
//!
//! 1. `DOCK_MEDIC_CONFIG` environment variable (path to TOML file)
//! 2. `dock_medic.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded config is passed by value into `Orchestrator::new`; there is no
//! process-global config.

mod orchestrator_config;
pub mod defaults;

pub use orchestrator_config::*;
