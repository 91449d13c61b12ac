//! Canonical resource shapes and display helpers for tns-csi resources
//!
//! Core kinds come straight from k8s-openapi; the snapshot CRD group
//! (snapshot.storage.k8s.io/v1) is not part of k8s-openapi and is typed
//! locally at the fields we actually use. Everything fetched from the API
//! server is normalized into these shapes at the ingestion boundary, so the
//! filtering and aggregation code never branches on representation.

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde::{Deserialize, Serialize};

// =============================================================================
// Driver identity
// =============================================================================

/// Provisioner/driver discriminator for every resource owned by this driver.
pub const DRIVER_PROVISIONER: &str = "tns.csi.io";

/// Label selector matching the driver's controller pods.
pub const CONTROLLER_SELECTOR: &str =
    "app.kubernetes.io/name=tns-csi-driver,app.kubernetes.io/component=controller";

/// Label selector matching the driver's per-node pods.
pub const NODE_SELECTOR: &str =
    "app.kubernetes.io/name=tns-csi-driver,app.kubernetes.io/component=node";

// =============================================================================
// Snapshot CRDs (snapshot.storage.k8s.io/v1)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<VolumeSnapshotSpec>,
    #[serde(default)]
    pub status: Option<VolumeSnapshotStatus>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    #[serde(default)]
    pub volume_snapshot_class_name: Option<String>,
    #[serde(default)]
    pub source: Option<VolumeSnapshotSource>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    #[serde(default)]
    pub persistent_volume_claim_name: Option<String>,
    #[serde(default)]
    pub volume_snapshot_content_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(default)]
    pub ready_to_use: Option<bool>,
    #[serde(default)]
    pub restore_size: Option<String>,
    #[serde(default)]
    pub error: Option<VolumeSnapshotError>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeSnapshotError {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotClass {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub deletion_policy: Option<String>,
}

// =============================================================================
// List envelope
// =============================================================================

/// Minimal typed list envelope for API-server list responses.
#[derive(Debug, Clone, Deserialize)]
pub struct KubeList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

// =============================================================================
// Pod helpers
// =============================================================================

/// A pod is ready when its Ready condition reports True.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Total restarts across all containers in the pod.
pub fn pod_restarts(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|cs| cs.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0)
}

/// Image of the first container, or "unknown".
pub fn pod_image(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|cs| cs.first())
        .map(|c| c.image.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

// =============================================================================
// Display helpers
// =============================================================================

/// Compact human-readable age from a creation timestamp.
pub fn format_age(timestamp: Option<&Time>) -> String {
    let Some(ts) = timestamp else {
        return "unknown".to_string();
    };
    let secs = (Utc::now() - ts.0).num_seconds().max(0);
    if secs < 60 {
        return format!("{}s", secs);
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{}m", mins);
    }
    let hours = mins / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }
    format!("{}d", hours / 24)
}

/// Abbreviated access mode display ("RWO, RWX").
pub fn format_access_modes(modes: Option<&Vec<String>>) -> String {
    let Some(modes) = modes.filter(|m| !m.is_empty()) else {
        return "—".to_string();
    };
    modes
        .iter()
        .map(|m| match m.as_str() {
            "ReadWriteOnce" => "RWO",
            "ReadWriteMany" => "RWX",
            "ReadOnlyMany" => "ROX",
            "ReadWriteOncePod" => "RWOP",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Canonical display name for a storage protocol parameter.
pub fn format_protocol(protocol: Option<&str>) -> String {
    match protocol {
        None | Some("") => "—".to_string(),
        Some(p) => match p.to_lowercase().as_str() {
            "nfs" => "NFS".to_string(),
            "nvmeof" => "NVMe-oF".to_string(),
            "iscsi" => "iSCSI".to_string(),
            _ => p.to_string(),
        },
    }
}

/// Severity bucket for a resource phase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Success,
    Warning,
    Error,
}

pub fn phase_to_status(phase: Option<&str>) -> StatusLevel {
    match phase {
        Some("Bound") | Some("Available") | Some("Running") | Some("Succeeded") => {
            StatusLevel::Success
        }
        Some("Pending") | Some("Released") => StatusLevel::Warning,
        _ => StatusLevel::Error,
    }
}
