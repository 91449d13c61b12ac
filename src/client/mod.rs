//! Cluster access seams
//!
//! - [`proxy`]: the raw-path request collaborator (`ApiProxy`) and its
//!   kube-backed implementation
//! - [`lists`]: the polling list collaborator publishing reactive
//!   (items, error) pairs

pub mod lists;
pub mod proxy;

pub use lists::{ListSource, ListState};
pub use proxy::{ApiProxy, KubeApiProxy};
