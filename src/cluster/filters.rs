//! Ownership predicates and cross-referencing for driver resources
//!
//! Pure functions deciding which cluster objects belong to the driver and
//! joining related objects (volume to claim, snapshot to snapshot class).
//! Predicates never panic on missing optional fields; an object lacking its
//! discriminator is simply not owned. Filters preserve input order and never
//! mutate their inputs.

use crate::cluster::resources::{VolumeSnapshot, VolumeSnapshotClass};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use std::collections::HashSet;

// =============================================================================
// Ownership predicates
// =============================================================================

/// A storage class is owned when its provisioner equals the driver constant
/// exactly (case-sensitive).
pub fn is_driver_storage_class(sc: &StorageClass, driver: &str) -> bool {
    sc.provisioner == driver
}

/// A persistent volume is owned when its embedded CSI source names the driver.
/// Volumes without a CSI source are excluded, not an error.
pub fn is_driver_volume(pv: &PersistentVolume, driver: &str) -> bool {
    pv.spec
        .as_ref()
        .and_then(|spec| spec.csi.as_ref())
        .map(|csi| csi.driver == driver)
        .unwrap_or(false)
}

/// Snapshot classes carry the driver in their own `driver` field, not a
/// provisioner field.
pub fn is_driver_snapshot_class(class: &VolumeSnapshotClass, driver: &str) -> bool {
    class.driver.as_deref() == Some(driver)
}

// =============================================================================
// Filters
// =============================================================================

pub fn filter_storage_classes(items: &[StorageClass], driver: &str) -> Vec<StorageClass> {
    items
        .iter()
        .filter(|sc| is_driver_storage_class(sc, driver))
        .cloned()
        .collect()
}

pub fn filter_volumes(items: &[PersistentVolume], driver: &str) -> Vec<PersistentVolume> {
    items
        .iter()
        .filter(|pv| is_driver_volume(pv, driver))
        .cloned()
        .collect()
}

fn claim_ref_key(pv: &PersistentVolume) -> Option<String> {
    let claim_ref = pv.spec.as_ref()?.claim_ref.as_ref()?;
    let name = claim_ref.name.as_deref()?;
    let namespace = claim_ref.namespace.as_deref().unwrap_or("");
    Some(format!("{}/{}", namespace, name))
}

/// Claims bound to one of the (already filtered) driver volumes, by
/// claim-reference. Empty whenever `driver_volumes` is empty, regardless of
/// the claim list.
pub fn filter_claims(
    claims: &[PersistentVolumeClaim],
    driver_volumes: &[PersistentVolume],
) -> Vec<PersistentVolumeClaim> {
    let bound: HashSet<String> = driver_volumes.iter().filter_map(claim_ref_key).collect();

    claims
        .iter()
        .filter(|pvc| {
            let name = pvc.metadata.name.as_deref().unwrap_or("");
            let namespace = pvc.metadata.namespace.as_deref().unwrap_or("");
            bound.contains(&format!("{}/{}", namespace, name))
        })
        .cloned()
        .collect()
}

/// First driver volume whose claim-reference matches the claim. At most one
/// volume can be bound to a given (namespace, name) pair, so the search
/// short-circuits.
pub fn find_bound_volume<'a>(
    claim: &PersistentVolumeClaim,
    driver_volumes: &'a [PersistentVolume],
) -> Option<&'a PersistentVolume> {
    let name = claim.metadata.name.as_deref()?;
    let namespace = claim.metadata.namespace.as_deref().unwrap_or("");
    driver_volumes.iter().find(|pv| {
        pv.spec
            .as_ref()
            .and_then(|spec| spec.claim_ref.as_ref())
            .map(|r| {
                r.name.as_deref() == Some(name)
                    && r.namespace.as_deref().unwrap_or("") == namespace
            })
            .unwrap_or(false)
    })
}

/// Names of the driver's snapshot classes.
pub fn driver_snapshot_class_names(
    classes: &[VolumeSnapshotClass],
    driver: &str,
) -> HashSet<String> {
    classes
        .iter()
        .filter(|c| is_driver_snapshot_class(c, driver))
        .filter_map(|c| c.metadata.name.clone())
        .collect()
}

/// Snapshots whose snapshot-class name belongs to the driver's class set.
pub fn filter_snapshots(
    snapshots: &[VolumeSnapshot],
    driver_class_names: &HashSet<String>,
) -> Vec<VolumeSnapshot> {
    snapshots
        .iter()
        .filter(|s| {
            s.spec
                .as_ref()
                .and_then(|spec| spec.volume_snapshot_class_name.as_deref())
                .map(|name| driver_class_names.contains(name))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::resources::{VolumeSnapshotSpec, DRIVER_PROVISIONER};
    use k8s_openapi::api::core::v1::{
        CSIPersistentVolumeSource, ObjectReference, PersistentVolumeSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn storage_class(name: &str, provisioner: &str) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            provisioner: provisioner.into(),
            ..Default::default()
        }
    }

    fn volume(name: &str, driver: Option<&str>, claim: Option<(&str, &str)>) -> PersistentVolume {
        PersistentVolume {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                csi: driver.map(|d| CSIPersistentVolumeSource {
                    driver: d.into(),
                    ..Default::default()
                }),
                claim_ref: claim.map(|(ns, n)| ObjectReference {
                    namespace: Some(ns.into()),
                    name: Some(n.into()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn claim(namespace: &str, name: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_storage_class_ownership_is_exact_match() {
        let ours = storage_class("tns-nfs", DRIVER_PROVISIONER);
        let other = storage_class("local", "rancher.io/local-path");
        let cased = storage_class("cased", "TNS.CSI.IO");

        assert!(is_driver_storage_class(&ours, DRIVER_PROVISIONER));
        assert!(!is_driver_storage_class(&other, DRIVER_PROVISIONER));
        assert!(!is_driver_storage_class(&cased, DRIVER_PROVISIONER));

        let filtered =
            filter_storage_classes(&[other, ours.clone(), cased], DRIVER_PROVISIONER);
        assert_eq!(filtered, vec![ours]);
    }

    #[test]
    fn test_volume_without_csi_source_is_not_owned() {
        let no_source = volume("pv-plain", None, None);
        let no_spec = PersistentVolume::default();
        assert!(!is_driver_volume(&no_source, DRIVER_PROVISIONER));
        assert!(!is_driver_volume(&no_spec, DRIVER_PROVISIONER));
        assert!(is_driver_volume(
            &volume("pv-1", Some(DRIVER_PROVISIONER), None),
            DRIVER_PROVISIONER
        ));
    }

    #[test]
    fn test_filter_volumes_preserves_order() {
        let a = volume("pv-a", Some(DRIVER_PROVISIONER), None);
        let b = volume("pv-b", Some("ebs.csi.aws.com"), None);
        let c = volume("pv-c", Some(DRIVER_PROVISIONER), None);
        let filtered = filter_volumes(&[a.clone(), b, c.clone()], DRIVER_PROVISIONER);
        assert_eq!(filtered, vec![a, c]);
    }

    #[test]
    fn test_claim_filtering_depends_on_driver_volumes() {
        let volumes = vec![
            volume("pv-1", Some(DRIVER_PROVISIONER), Some(("default", "data"))),
            volume("pv-2", Some(DRIVER_PROVISIONER), None),
        ];
        let claims = vec![claim("default", "data"), claim("default", "other"), claim("prod", "data")];

        let filtered = filter_claims(&claims, &volumes);
        assert_eq!(filtered, vec![claim("default", "data")]);

        // No driver volumes means no claims, regardless of the claim list.
        assert!(filter_claims(&claims, &[]).is_empty());
    }

    #[test]
    fn test_find_bound_volume_returns_first_match_or_none() {
        let volumes = vec![
            volume("pv-1", Some(DRIVER_PROVISIONER), Some(("default", "data"))),
            volume("pv-2", Some(DRIVER_PROVISIONER), Some(("default", "data"))),
        ];
        let found = find_bound_volume(&claim("default", "data"), &volumes).unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("pv-1"));

        assert!(find_bound_volume(&claim("default", "missing"), &volumes).is_none());
        assert!(find_bound_volume(&PersistentVolumeClaim::default(), &volumes).is_none());
    }

    #[test]
    fn test_snapshot_filtering_goes_through_class_names() {
        let classes = vec![
            VolumeSnapshotClass {
                metadata: ObjectMeta {
                    name: Some("tns-snap".into()),
                    ..Default::default()
                },
                driver: Some(DRIVER_PROVISIONER.into()),
                ..Default::default()
            },
            VolumeSnapshotClass {
                metadata: ObjectMeta {
                    name: Some("other-snap".into()),
                    ..Default::default()
                },
                driver: Some("ebs.csi.aws.com".into()),
                ..Default::default()
            },
            VolumeSnapshotClass::default(),
        ];
        let names = driver_snapshot_class_names(&classes, DRIVER_PROVISIONER);
        assert_eq!(names.len(), 1);
        assert!(names.contains("tns-snap"));

        let snap = |class: Option<&str>| VolumeSnapshot {
            spec: Some(VolumeSnapshotSpec {
                volume_snapshot_class_name: class.map(String::from),
                ..Default::default()
            }),
            ..Default::default()
        };
        let snapshots = vec![snap(Some("tns-snap")), snap(Some("other-snap")), snap(None)];
        let filtered = filter_snapshots(&snapshots, &names);
        assert_eq!(filtered.len(), 1);
        assert_eq!(
            filtered[0]
                .spec
                .as_ref()
                .unwrap()
                .volume_snapshot_class_name
                .as_deref(),
            Some("tns-snap")
        );
    }
}
