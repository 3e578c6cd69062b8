//! Persisted service state
//!
//! Service state is stored one JSON document per service so a corrupt entry
//! only affects that service's recovery.

pub mod persistence;
mod sled_store;

pub use persistence::{InMemoryStateStore, StateStore, StorageError};
pub use sled_store::SledStateStore;
