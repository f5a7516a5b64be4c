//! In-memory registry of configured broker instances.

pub mod instances_model;
pub mod instances_registry;

pub use instances_model::{HealthStatus, Instance, MarketDataRole, NewInstance};
pub use instances_registry::InstanceRegistry;
