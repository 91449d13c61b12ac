//! Extraction of the driver's well-known metric families
//!
//! Reads the fixed set of tns-csi family names out of a decoded family map
//! into one typed snapshot. Absence of a family is never an error: scalars
//! become `None`, vectors become empty lists.

use crate::metrics::text::{MetricFamilies, MetricSample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Typed snapshot
// =============================================================================

/// Driver controller metrics surfaced on the health views.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverMetrics {
    /// 1 = connected, 0 = disconnected
    pub websocket_connected: Option<f64>,
    pub websocket_reconnects_total: Option<f64>,
    pub websocket_messages_total: Vec<MetricSample>,
    pub websocket_message_duration_seconds: Vec<MetricSample>,

    pub volume_operations_total: Vec<MetricSample>,
    pub volume_operations_duration_seconds: Vec<MetricSample>,
    pub volume_capacity_bytes: Vec<MetricSample>,

    pub csi_operations_total: Vec<MetricSample>,
    pub csi_operations_duration_seconds: Vec<MetricSample>,
}

/// Lone value of a scalar family, or None when absent or empty.
pub fn scalar(families: &MetricFamilies, name: &str) -> Option<f64> {
    families
        .get(name)
        .and_then(|f| f.samples.first())
        .map(|s| s.value)
}

/// Full sample list of a family, or empty when absent.
pub fn samples_for(families: &MetricFamilies, name: &str) -> Vec<MetricSample> {
    families
        .get(name)
        .map(|f| f.samples.clone())
        .unwrap_or_default()
}

/// Read the well-known tns-csi families into a typed snapshot.
pub fn extract(families: &MetricFamilies) -> DriverMetrics {
    DriverMetrics {
        websocket_connected: scalar(families, "tns_websocket_connected"),
        websocket_reconnects_total: scalar(families, "tns_websocket_reconnects_total"),
        websocket_messages_total: samples_for(families, "tns_websocket_messages_total"),
        websocket_message_duration_seconds: samples_for(
            families,
            "tns_websocket_message_duration_seconds",
        ),

        volume_operations_total: samples_for(families, "tns_volume_operations_total"),
        volume_operations_duration_seconds: samples_for(
            families,
            "tns_volume_operations_duration_seconds",
        ),
        volume_capacity_bytes: samples_for(families, "tns_volume_capacity_bytes"),

        csi_operations_total: samples_for(families, "tns_csi_operations_total"),
        csi_operations_duration_seconds: samples_for(
            families,
            "tns_csi_operations_duration_seconds",
        ),
    }
}

// =============================================================================
// Aggregation / display helpers
// =============================================================================

/// Sum of all sample values.
pub fn sum_samples(samples: &[MetricSample]) -> f64 {
    samples.iter().map(|s| s.value).sum()
}

/// Group samples by a label key, summing values per group. Samples without
/// the label land under "unknown".
pub fn group_by_label(samples: &[MetricSample], label_key: &str) -> BTreeMap<String, f64> {
    let mut groups = BTreeMap::new();
    for sample in samples {
        let key = sample
            .labels
            .get(label_key)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        *groups.entry(key).or_insert(0.0) += sample.value;
    }
    groups
}

/// Samples where a label equals a value.
pub fn filter_by_label<'a>(
    samples: &'a [MetricSample],
    label_key: &str,
    label_value: &str,
) -> Vec<&'a MetricSample> {
    samples
        .iter()
        .filter(|s| s.labels.get(label_key).map(String::as_str) == Some(label_value))
        .collect()
}

/// Human-readable bytes (decimal breakpoints).
pub fn format_bytes(bytes: f64) -> String {
    if bytes >= 1e9 {
        format!("{:.1} GB", bytes / 1e9)
    } else if bytes >= 1e6 {
        format!("{:.1} MB", bytes / 1e6)
    } else if bytes >= 1e3 {
        format!("{:.1} KB", bytes / 1e3)
    } else {
        format!("{} B", bytes)
    }
}
