//! Driver-owned cluster state
//!
//! - [`resources`]: canonical resource shapes, driver constants, display helpers
//! - [`filters`]: ownership predicates and cross-referencing
//! - [`aggregate`]: the refreshable aggregated view

pub mod aggregate;
pub mod filters;
pub mod resources;

pub use aggregate::{AggregatedView, Aggregator, AggregatorConfig, SourceError};
pub use resources::{DRIVER_PROVISIONER, CONTROLLER_SELECTOR, NODE_SELECTOR};
