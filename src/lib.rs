//! CSI Console
//!
//! Backend service for the TrueNAS CSI driver dashboard. Aggregates the
//! driver-owned slice of a cluster (storage classes, volumes, claims, driver
//! pods, snapshots), decodes the controller's Prometheus metrics, and drives
//! kbench benchmark runs, all exposed over a small REST API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         REST API (axum)                      │
//! │   /v1/state  /v1/metrics  /v1/benchmark  /v1/settings        │
//! ├──────────────────┬──────────────────┬────────────────────────┤
//! │    Aggregator    │  DriverMetrics   │    BenchmarkRunner     │
//! │  (cluster view)  │   (decoder)      │    (kbench Jobs)       │
//! ├──────────────────┴──────────────────┴────────────────────────┤
//! │                    ApiProxy (kube::Client)                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`api`]: REST surface
//! - [`bench`]: kbench benchmark orchestration and FIO parsing
//! - [`client`]: API-server access seams (proxy, polling lists)
//! - [`cluster`]: driver resource filtering and the aggregated view
//! - [`config`]: persisted console settings
//! - [`error`]: error types and handling
//! - [`metrics`]: Prometheus text decoding and driver metric extraction

pub mod api;
pub mod bench;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use api::RestRouter;
pub use bench::{
    BenchTiming, BenchmarkResult, BenchmarkRunner, BenchmarkState, FioReport, JobPhase,
    MetricGroup, RunRequest,
};
pub use client::{ApiProxy, KubeApiProxy, ListSource, ListState};
pub use cluster::{
    AggregatedView, Aggregator, AggregatorConfig, SourceError, DRIVER_PROVISIONER,
};
pub use config::{Settings, SettingsStore};
pub use error::{Error, Result};
pub use metrics::{DriverMetrics, MetricFamilies, MetricFamily, MetricSample};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
