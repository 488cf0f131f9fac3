//! Core types and service wiring for the binflow waste collection engine.

/// Pickup records and the bin reset they trigger.
pub mod collection;
/// Engine settings.
pub mod config;
/// Resident disposal reports.
pub mod disposal;
/// Error type shared by all operations.
pub mod error;
/// In-memory adapters for the ports.
pub mod memory;
/// Domain models and identifiers.
pub mod model;
/// Route dispatch and progression.
pub mod planner;
/// Traits describing storage, identity, notification, and time.
pub mod ports;
/// Bin records and the fill/status state machine.
pub mod registry;
/// High-level service facade used by clients.
pub mod service;
/// Sensor feed emulation.
pub mod simulator;
/// Stop sequencing strategies.
pub mod strategy;

pub use collection::*;
pub use config::*;
pub use error::*;
pub use model::*;
pub use planner::*;
pub use ports::*;
pub use registry::*;
pub use service::*;
pub use strategy::*;
