//! Error types for the csi-console backend
//!
//! One structured error enum covering cluster transport, response-shape
//! validation, benchmark lifecycle failures, and configuration handling.

use thiserror::Error;

/// Unified error type for the console backend
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Failed to build API request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Response arrived but did not have the expected shape.
    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    // =========================================================================
    // Benchmark Errors
    // =========================================================================
    #[error("Scratch volume {volume} was not bound within {seconds}s; check that the storage class provisioner is healthy")]
    BindTimeout { volume: String, seconds: u64 },

    #[error("No pod found for benchmark job {job}")]
    NoPodForJob { job: String },

    #[error("Benchmark logs for job {job} could not be parsed")]
    LogParse { job: String },

    #[error("Cleanup incomplete: {0}")]
    Cleanup(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Settings file error: {0}")]
    SettingsFile(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient errors are worth retrying; everything else needs a
    /// configuration change or user action first.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube(_))
    }

    /// True for failures caused by a response that arrived but could not be
    /// consumed, as opposed to transport failures.
    pub fn is_shape_error(&self) -> bool {
        matches!(self, Error::UnexpectedShape(_) | Error::JsonParse(_))
    }
}

/// Result type alias for the console backend
pub type Result<T> = std::result::Result<T, Error>;
