//! Shared data structures for the container self-healing orchestrator
//!
//! - `service`: catalog entries, managed-service aggregate and its lifecycle enums
//! - `view`: read-only projection handed to API consumers and event payloads
//! - `event`: the `service_status` event broadcast on every state change

mod event;
mod service;
mod view;

pub use event::*;
pub use service::*;
pub use view::*;
