//! kbench manifest builders
//!
//! Builds the scratch PVC and the single-container kbench Job. The label
//! pairs below are an interop contract: the console finds its own benchmark
//! resources (and the frontend distinguishes them from user workloads) by
//! these exact keys and values.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

// =============================================================================
// Tracking labels / annotations
// =============================================================================

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "headlamp-tns-csi-plugin";
pub const KBENCH_LABEL: &str = "kbench";
pub const KBENCH_VALUE: &str = "fio";
pub const STORAGE_CLASS_ANNOTATION: &str = "tns-csi.headlamp/storage-class";

pub const KBENCH_IMAGE: &str = "yasker/kbench:latest";
pub const KBENCH_CONTAINER: &str = "kbench";

/// Combined selector for benchmark resources created by this console.
pub fn managed_selector() -> String {
    format!(
        "{}={},{}={}",
        MANAGED_BY_LABEL, MANAGED_BY_VALUE, KBENCH_LABEL, KBENCH_VALUE
    )
}

// =============================================================================
// Options
// =============================================================================

/// Parameters of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchOptions {
    pub job_name: String,
    pub pvc_name: String,
    pub namespace: String,
    pub storage_class: String,
    /// Test size token passed straight through to kbench (default "30G").
    pub size: String,
    /// "full" or "quick".
    pub mode: String,
}

/// Scratch volume capacity for a test size. kbench needs roughly 10% headroom
/// over the test file; the default 30G test is backed by a 33Gi volume.
/// Custom sizes are passed through uninterpreted and the caller is
/// responsible for choosing a compatible volume size.
pub fn scratch_volume_size(test_size: &str) -> String {
    match test_size {
        "30G" => "33Gi".to_string(),
        other => other.to_string(),
    }
}

fn tracking_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (KBENCH_LABEL.to_string(), KBENCH_VALUE.to_string()),
    ])
}

fn tracking_annotations(storage_class: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(
        STORAGE_CLASS_ANNOTATION.to_string(),
        storage_class.to_string(),
    )])
}

// =============================================================================
// Manifests
// =============================================================================

/// Scratch PVC backing the benchmark run.
pub fn build_pvc(opts: &BenchOptions) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(opts.pvc_name.clone()),
            namespace: Some(opts.namespace.clone()),
            labels: Some(tracking_labels()),
            annotations: Some(tracking_annotations(&opts.storage_class)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some(opts.storage_class.clone()),
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(scratch_volume_size(&opts.size)),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The kbench Job: one container, no restart, zero retry budget.
pub fn build_job(opts: &BenchOptions) -> Job {
    let env = vec![
        env_var("MODE", &opts.mode),
        env_var("FILE_NAME", "/volume/test"),
        env_var("SIZE", &opts.size),
        env_var("CPU_IDLE_PROF", "disabled"),
    ];

    Job {
        metadata: ObjectMeta {
            name: Some(opts.job_name.clone()),
            namespace: Some(opts.namespace.clone()),
            labels: Some(tracking_labels()),
            annotations: Some(tracking_annotations(&opts.storage_class)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::from([(
                        KBENCH_LABEL.to_string(),
                        KBENCH_VALUE.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: KBENCH_CONTAINER.to_string(),
                        image: Some(KBENCH_IMAGE.to_string()),
                        env: Some(env),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "vol".to_string(),
                            mount_path: "/volume/".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "vol".to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: opts.pvc_name.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}
