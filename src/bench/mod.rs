//! kbench benchmarking
//!
//! - [`manifest`]: scratch PVC / Job builders and the tracking labels
//! - [`runner`]: the run state machine
//! - [`fio`]: FIO summary parsing and result formatting
//!
//! History is read back from the cluster itself: every Job this console
//! created carries the tracking labels, so a label-selector list is the
//! source of truth and survives restarts.

pub mod fio;
pub mod manifest;
pub mod runner;

pub use fio::{parse_fio_summary, FioReport, MetricGroup};
pub use manifest::{managed_selector, BenchOptions};
pub use runner::{
    BenchTiming, BenchmarkResult, BenchmarkRunner, BenchmarkState, JobPhase, RunRequest,
};

use crate::client::proxy::jobs_by_selector_path;
use crate::client::ApiProxy;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One past (or in-flight) benchmark Job, as reconstructed from the cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_name: String,
    pub namespace: String,
    /// Read back from the tracking annotation; absent on Jobs created by
    /// older console versions.
    pub storage_class: Option<String>,
    pub phase: JobPhase,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// List benchmark Jobs created by this console, newest first. `namespace`
/// of `None` lists cluster-wide.
pub async fn list_jobs(
    proxy: &dyn ApiProxy,
    namespace: Option<&str>,
) -> Result<Vec<JobSummary>> {
    let path = jobs_by_selector_path(namespace, &managed_selector());
    let value = proxy.get_json(&path).await?;

    let mut summaries: Vec<JobSummary> = value
        .get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(summarize_job).collect())
        .unwrap_or_default();

    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(summaries)
}

fn summarize_job(item: &Value) -> Option<JobSummary> {
    let metadata = item.get("metadata")?;
    let name = metadata.get("name")?.as_str()?.to_string();
    let namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let storage_class = metadata
        .get("annotations")
        .and_then(|a| a.get(manifest::STORAGE_CLASS_ANNOTATION))
        .and_then(Value::as_str)
        .map(String::from);

    let status = item.get("status");
    let phase = phase_from_status(status);
    let created_at = parse_time(metadata.get("creationTimestamp"));
    let completed_at = parse_time(status.and_then(|s| s.get("completionTime")));

    Some(JobSummary {
        job_name: name,
        namespace,
        storage_class,
        phase,
        created_at,
        completed_at,
    })
}

fn phase_from_status(status: Option<&Value>) -> JobPhase {
    let count = |field: &str| {
        status
            .and_then(|s| s.get(field))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    };
    if count("succeeded") > 0 {
        JobPhase::Complete
    } else if count("failed") > 0 {
        JobPhase::Failed
    } else if count("active") > 0 {
        JobPhase::Active
    } else {
        JobPhase::Unknown
    }
}

fn parse_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}
