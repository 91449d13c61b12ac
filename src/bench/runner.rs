//! Benchmark orchestrator
//!
//! Drives one kbench run end to end: create the scratch volume, wait for it
//! to bind (bounded), create the Job, poll its phase, then fetch and parse
//! the pod log. State transitions are one-directional and published on a
//! watch channel; starting a new run abandons any prior terminal state.
//!
//! The bind wait swallows poll errors until its deadline; once the Job
//! exists, a single polling-transport failure is terminal — at that point a
//! transient error usually means something systemic.

use crate::bench::fio::{parse_fio_summary, MetricGroup};
use crate::bench::manifest::{self, BenchOptions};
use crate::client::proxy::pods_by_selector_path;
use crate::client::ApiProxy;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Run state
// =============================================================================

/// Metadata attached to a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub storage_class: String,
    pub size: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub job_name: String,
    pub pvc_name: String,
    pub namespace: String,
}

/// Immutable result of a completed benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    pub iops: MetricGroup,
    /// KiB/s
    pub bandwidth: MetricGroup,
    /// nanoseconds
    pub latency: MetricGroup,
    pub metadata: RunMetadata,
}

/// Current state of the benchmark state machine. Exactly one state is active;
/// no state is ever revisited within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum BenchmarkState {
    Idle,
    CreatingVolume {
        job_name: String,
        pvc_name: String,
    },
    WaitingBind {
        job_name: String,
        pvc_name: String,
    },
    Running {
        job_name: String,
        pvc_name: String,
        started_at: DateTime<Utc>,
    },
    Parsing {
        job_name: String,
        pvc_name: String,
    },
    Complete {
        job_name: String,
        pvc_name: String,
        result: Box<BenchmarkResult>,
    },
    Failed {
        job_name: String,
        pvc_name: String,
        error: String,
    },
}

impl BenchmarkState {
    /// Job name of the active run, if any.
    pub fn job_name(&self) -> Option<&str> {
        match self {
            BenchmarkState::Idle => None,
            BenchmarkState::CreatingVolume { job_name, .. }
            | BenchmarkState::WaitingBind { job_name, .. }
            | BenchmarkState::Running { job_name, .. }
            | BenchmarkState::Parsing { job_name, .. }
            | BenchmarkState::Complete { job_name, .. }
            | BenchmarkState::Failed { job_name, .. } => Some(job_name),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BenchmarkState::Complete { .. } | BenchmarkState::Failed { .. }
        )
    }
}

/// Observed phase of the benchmark Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobPhase {
    Active,
    Complete,
    Failed,
    Unknown,
}

// =============================================================================
// Timing
// =============================================================================

/// Poll cadences and the bind deadline. Injectable so embedders can tighten
/// them and tests can run against a paused clock.
#[derive(Debug, Clone)]
pub struct BenchTiming {
    pub bind_poll: Duration,
    pub bind_deadline: Duration,
    pub job_poll: Duration,
}

impl Default for BenchTiming {
    fn default() -> Self {
        Self {
            bind_poll: Duration::from_secs(5),
            bind_deadline: Duration::from_secs(120),
            job_poll: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Run request
// =============================================================================

/// Parameters accepted from the caller; names are generated per run.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub storage_class: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

pub const DEFAULT_SIZE: &str = "30G";
pub const DEFAULT_MODE: &str = "full";

fn default_namespace() -> String {
    "default".to_string()
}

/// Identity of the run the runner is currently tracking, kept for cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRun {
    pub job_name: String,
    pub pvc_name: String,
    pub namespace: String,
}

/// Short unique token from the nanosecond clock.
fn short_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{:06x}", nanos & 0xff_ffff)
}

pub fn generate_job_name() -> String {
    format!("kbench-{}", short_id())
}

pub fn pvc_name_for(job_name: &str) -> String {
    format!("{}-pvc", job_name)
}

// =============================================================================
// Runner
// =============================================================================

/// Owns the benchmark state machine. Only one run is tracked at a time;
/// starting a new run abandons the previous job/volume (which then need
/// explicit cleanup).
pub struct BenchmarkRunner {
    proxy: Arc<dyn ApiProxy>,
    timing: BenchTiming,
    state_tx: watch::Sender<BenchmarkState>,
    run_cancel: Mutex<CancellationToken>,
    active: Mutex<Option<ActiveRun>>,
}

impl BenchmarkRunner {
    pub fn new(proxy: Arc<dyn ApiProxy>) -> Arc<Self> {
        Self::with_timing(proxy, BenchTiming::default())
    }

    pub fn with_timing(proxy: Arc<dyn ApiProxy>, timing: BenchTiming) -> Arc<Self> {
        let (state_tx, _) = watch::channel(BenchmarkState::Idle);
        Arc::new(Self {
            proxy,
            timing,
            state_tx,
            run_cancel: Mutex::new(CancellationToken::new()),
            active: Mutex::new(None),
        })
    }

    pub fn state(&self) -> BenchmarkState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BenchmarkState> {
        self.state_tx.subscribe()
    }

    /// Begin a new run, abandoning any prior one. Returns the generated
    /// (job, scratch volume) names.
    pub fn start(self: &Arc<Self>, request: RunRequest) -> (String, String) {
        let job_name = generate_job_name();
        let pvc_name = pvc_name_for(&job_name);

        let cancel = CancellationToken::new();
        {
            let mut current = self.run_cancel.lock().unwrap();
            current.cancel();
            *current = cancel.clone();
        }

        let opts = BenchOptions {
            job_name: job_name.clone(),
            pvc_name: pvc_name.clone(),
            namespace: request.namespace,
            storage_class: request.storage_class,
            size: request.size.unwrap_or_else(|| DEFAULT_SIZE.to_string()),
            mode: request.mode.unwrap_or_else(|| DEFAULT_MODE.to_string()),
        };

        *self.active.lock().unwrap() = Some(ActiveRun {
            job_name: job_name.clone(),
            pvc_name: pvc_name.clone(),
            namespace: opts.namespace.clone(),
        });

        info!(job = %job_name, storage_class = %opts.storage_class, "starting benchmark run");
        self.state_tx.send_replace(BenchmarkState::CreatingVolume {
            job_name: job_name.clone(),
            pvc_name: pvc_name.clone(),
        });

        let runner = self.clone();
        tokio::spawn(async move {
            runner.drive(opts, cancel).await;
        });

        (job_name, pvc_name)
    }

    /// Stop the active run's polling without touching cluster resources.
    pub fn stop(&self) {
        self.run_cancel.lock().unwrap().cancel();
    }

    /// Identity of the tracked run, if any.
    pub fn active(&self) -> Option<ActiveRun> {
        self.active.lock().unwrap().clone()
    }

    /// Stop and delete the tracked run's resources. `Ok(None)` when there is
    /// nothing to clean up; the tracked identity is kept on failure so the
    /// cleanup can be retried.
    pub async fn cleanup_active(&self) -> Result<Option<ActiveRun>> {
        let Some(run) = self.active() else {
            return Ok(None);
        };
        self.cleanup(&run.job_name, &run.pvc_name, &run.namespace)
            .await?;
        *self.active.lock().unwrap() = None;
        Ok(Some(run))
    }

    /// Best-effort deletion of the run's Job and scratch volume, independent
    /// of the state machine. Resets the state to idle when both succeed.
    pub async fn cleanup(&self, job_name: &str, pvc_name: &str, namespace: &str) -> Result<()> {
        self.stop();

        let mut failures = Vec::new();

        let job_path = format!(
            "/apis/batch/v1/namespaces/{}/jobs/{}",
            namespace, job_name
        );
        let delete_opts = json!({ "propagationPolicy": "Foreground" });
        if let Err(err) = self.proxy.delete(&job_path, Some(&delete_opts)).await {
            warn!(job = job_name, error = %err, "job deletion failed");
            failures.push(format!("job {}: {}", job_name, err));
        }

        let pvc_path = format!(
            "/api/v1/namespaces/{}/persistentvolumeclaims/{}",
            namespace, pvc_name
        );
        if let Err(err) = self.proxy.delete(&pvc_path, None).await {
            warn!(pvc = pvc_name, error = %err, "scratch volume deletion failed");
            failures.push(format!("volume {}: {}", pvc_name, err));
        }

        if failures.is_empty() {
            self.state_tx.send_replace(BenchmarkState::Idle);
            Ok(())
        } else {
            Err(Error::Cleanup(failures.join("; ")))
        }
    }

    /// Publish a state unless this run has been superseded or stopped.
    fn publish(&self, cancel: &CancellationToken, state: BenchmarkState) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        self.state_tx.send_replace(state);
        true
    }

    // =========================================================================
    // The run itself
    // =========================================================================

    async fn drive(self: Arc<Self>, opts: BenchOptions, cancel: CancellationToken) {
        let job_name = opts.job_name.clone();
        let pvc_name = opts.pvc_name.clone();
        let fail = |error: String| BenchmarkState::Failed {
            job_name: job_name.clone(),
            pvc_name: pvc_name.clone(),
            error,
        };

        // Step 1: scratch volume.
        if let Err(err) = self.create_pvc(&opts).await {
            self.publish(&cancel, fail(format!("Failed to create scratch volume: {}", err)));
            return;
        }
        if !self.publish(
            &cancel,
            BenchmarkState::WaitingBind {
                job_name: job_name.clone(),
                pvc_name: pvc_name.clone(),
            },
        ) {
            return;
        }

        // Step 2: wait for binding, bounded. Poll errors are swallowed until
        // the deadline.
        let deadline = tokio::time::Instant::now() + self.timing.bind_deadline;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.pvc_phase(&opts).await {
                Ok(phase) if phase == "Bound" => break,
                Ok(phase) => debug!(pvc = %pvc_name, %phase, "scratch volume not bound yet"),
                Err(err) => debug!(pvc = %pvc_name, error = %err, "bind poll failed, retrying"),
            }
            if tokio::time::Instant::now() >= deadline {
                let err = Error::BindTimeout {
                    volume: pvc_name.clone(),
                    seconds: self.timing.bind_deadline.as_secs(),
                };
                self.publish(&cancel, fail(err.to_string()));
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.timing.bind_poll) => {}
            }
        }

        // Step 3: the Job.
        if let Err(err) = self.create_job(&opts).await {
            self.publish(&cancel, fail(format!("Failed to create benchmark job: {}", err)));
            return;
        }
        let started_at = Utc::now();
        if !self.publish(
            &cancel,
            BenchmarkState::Running {
                job_name: job_name.clone(),
                pvc_name: pvc_name.clone(),
                started_at,
            },
        ) {
            return;
        }

        // Step 4: phase polling. No deadline (benchmarks legitimately run
        // long), but one transport failure is terminal.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.timing.job_poll) => {}
            }
            match self.job_phase(&opts).await {
                Ok(JobPhase::Complete) => break,
                Ok(JobPhase::Failed) => {
                    self.publish(
                        &cancel,
                        fail("Benchmark job failed; inspect the pod logs for details".into()),
                    );
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    self.publish(&cancel, fail(format!("Failed to poll benchmark job: {}", err)));
                    return;
                }
            }
        }

        // Step 5: fetch and parse the log.
        if !self.publish(
            &cancel,
            BenchmarkState::Parsing {
                job_name: job_name.clone(),
                pvc_name: pvc_name.clone(),
            },
        ) {
            return;
        }

        let pod_name = match self.find_job_pod(&opts).await {
            Ok(Some(name)) => name,
            Ok(None) => {
                let err = Error::NoPodForJob {
                    job: job_name.clone(),
                };
                self.publish(&cancel, fail(err.to_string()));
                return;
            }
            Err(err) => {
                self.publish(&cancel, fail(format!("Failed to look up benchmark pod: {}", err)));
                return;
            }
        };

        let log_text = match self.fetch_pod_log(&opts, &pod_name).await {
            Ok(text) => text,
            Err(err) => {
                self.publish(&cancel, fail(format!("Failed to retrieve benchmark logs: {}", err)));
                return;
            }
        };

        let Some(report) = parse_fio_summary(&log_text) else {
            let err = Error::LogParse {
                job: job_name.clone(),
            };
            self.publish(&cancel, fail(err.to_string()));
            return;
        };

        let result = BenchmarkResult {
            iops: report.iops,
            bandwidth: report.bandwidth,
            latency: report.latency,
            metadata: RunMetadata {
                storage_class: opts.storage_class.clone(),
                size: opts.size.clone(),
                started_at: Some(started_at),
                completed_at: Utc::now(),
                job_name: job_name.clone(),
                pvc_name: pvc_name.clone(),
                namespace: opts.namespace.clone(),
            },
        };

        info!(job = %job_name, "benchmark run complete");
        self.publish(
            &cancel,
            BenchmarkState::Complete {
                job_name,
                pvc_name,
                result: Box::new(result),
            },
        );
    }

    // =========================================================================
    // Cluster operations
    // =========================================================================

    async fn create_pvc(&self, opts: &BenchOptions) -> Result<()> {
        let path = format!(
            "/api/v1/namespaces/{}/persistentvolumeclaims",
            opts.namespace
        );
        let body = serde_json::to_value(manifest::build_pvc(opts))?;
        self.proxy.post_json(&path, &body).await?;
        Ok(())
    }

    async fn create_job(&self, opts: &BenchOptions) -> Result<()> {
        let path = format!("/apis/batch/v1/namespaces/{}/jobs", opts.namespace);
        let body = serde_json::to_value(manifest::build_job(opts))?;
        self.proxy.post_json(&path, &body).await?;
        Ok(())
    }

    async fn pvc_phase(&self, opts: &BenchOptions) -> Result<String> {
        let path = format!(
            "/api/v1/namespaces/{}/persistentvolumeclaims/{}",
            opts.namespace, opts.pvc_name
        );
        let value = self.proxy.get_json(&path).await?;
        Ok(value["status"]["phase"]
            .as_str()
            .unwrap_or("Unknown")
            .to_string())
    }

    async fn job_phase(&self, opts: &BenchOptions) -> Result<JobPhase> {
        let path = format!(
            "/apis/batch/v1/namespaces/{}/jobs/{}",
            opts.namespace, opts.job_name
        );
        let value = self.proxy.get_json(&path).await?;
        let job: Job = serde_json::from_value(value)?;
        Ok(phase_of(&job))
    }

    async fn find_job_pod(&self, opts: &BenchOptions) -> Result<Option<String>> {
        let selector = format!("job-name={}", opts.job_name);
        let path = pods_by_selector_path(&opts.namespace, &selector);
        let value = self.proxy.get_json(&path).await?;
        Ok(first_pod_name(&value))
    }

    async fn fetch_pod_log(&self, opts: &BenchOptions, pod_name: &str) -> Result<String> {
        let path = format!(
            "/api/v1/namespaces/{}/pods/{}/log?container={}",
            opts.namespace, pod_name, manifest::KBENCH_CONTAINER
        );
        self.proxy.get_text(&path).await
    }
}

/// Derive the phase from Job status counters.
pub fn phase_of(job: &Job) -> JobPhase {
    let Some(status) = job.status.as_ref() else {
        return JobPhase::Unknown;
    };
    if status.succeeded.unwrap_or(0) > 0 {
        JobPhase::Complete
    } else if status.failed.unwrap_or(0) > 0 {
        JobPhase::Failed
    } else if status.active.unwrap_or(0) > 0 {
        JobPhase::Active
    } else {
        JobPhase::Unknown
    }
}

fn first_pod_name(list: &Value) -> Option<String> {
    list.get("items")?
        .as_array()?
        .first()?
        .pointer("/metadata/name")?
        .as_str()
        .map(String::from)
}
