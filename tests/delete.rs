//! End-to-end exercises of the delete path (spec §4.5.2, §8 scenarios 3, 4)
//! against the in-memory fakes in `tests/common`.

mod common;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeSpec, PersistentVolumeStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use common::{FakeClusterApi, FakeProvider};
use provisioner_core::controller::delete::delete;
use provisioner_core::eligibility::should_delete;

fn volume(name: &str, phase: &str, provisioned_by: &str, reclaim: &str) -> PersistentVolume {
    let mut annotations = BTreeMap::new();
    annotations.insert("pv.kubernetes.io/provisioned-by".to_string(), provisioned_by.to_string());

    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.into()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            persistent_volume_reclaim_policy: Some(reclaim.into()),
            ..Default::default()
        }),
        status: Some(PersistentVolumeStatus {
            phase: Some(phase.into()),
            ..Default::default()
        }),
    }
}

/// Scenario 3 (§8): a released, Delete-policy, owned volume is deleted from
/// the backend exactly once and then removed from the API server.
#[tokio::test]
async fn delete_happy_path_removes_backend_and_api_object() {
    let volume = volume("volume-1", "Released", "foo.bar/baz", "Delete");
    let cluster = FakeClusterApi::new().with_volume(volume.clone());
    let provider = FakeProvider::new();

    assert!(should_delete(&volume, "foo.bar/baz"));

    delete(&cluster, &provider, &volume, "foo.bar/baz")
        .await
        .expect("delete should succeed");

    assert!(provider.was_deleted("volume-1"));
    assert!(cluster.volume("volume-1").is_none(), "Get should now return NotFound");
}

/// Scenario 4 (§8): a volume owned by another provisioner is never passed
/// to `Provider.Delete`, and the object is left alone.
#[tokio::test]
async fn foreign_volume_is_never_deleted() {
    let volume = volume("volume-1", "Released", "other/thing", "Delete");

    assert!(!should_delete(&volume, "foo.bar/baz"));
}

/// Idempotence law (§8): deleting twice yields one backend delete plus one
/// idempotent no-op, and both the object-delete calls succeed (the second
/// as NotFound).
#[tokio::test]
async fn deleting_twice_is_idempotent() {
    let volume = volume("volume-1", "Released", "foo.bar/baz", "Delete");
    let cluster = FakeClusterApi::new().with_volume(volume.clone());
    let provider = FakeProvider::new();

    delete(&cluster, &provider, &volume, "foo.bar/baz").await.unwrap();
    delete(&cluster, &provider, &volume, "foo.bar/baz")
        .await
        .expect("second delete should also succeed (NotFound)");
}

/// Boundary (§8): a Retain-policy volume is never delete-eligible even if
/// otherwise released and owned by this provisioner.
#[tokio::test]
async fn retain_policy_volume_is_not_delete_eligible() {
    let volume = volume("volume-1", "Released", "foo.bar/baz", "Retain");
    assert!(!should_delete(&volume, "foo.bar/baz"));
}

/// Boundary (§8): a Bound volume is never delete-eligible.
#[tokio::test]
async fn bound_volume_is_not_delete_eligible() {
    let volume = volume("volume-1", "Bound", "foo.bar/baz", "Delete");
    assert!(!should_delete(&volume, "foo.bar/baz"));
}

/// §4.5.2.b: a provider delete failure records a `VolumeFailedDelete`
/// warning and leaves the object in place (no object-delete call made).
#[tokio::test]
async fn provider_delete_failure_emits_event_and_keeps_object() {
    let volume = volume("volume-1", "Released", "foo.bar/baz", "Delete");
    let cluster = FakeClusterApi::new().with_volume(volume.clone());
    let provider = FakeProvider::new().failing_delete("target busy");

    let result = delete(&cluster, &provider, &volume, "foo.bar/baz").await;

    assert!(result.is_err());
    assert!(cluster.volume("volume-1").is_some(), "object should survive a failed backend delete");
    assert_eq!(cluster.event_reasons(), vec!["VolumeFailedDelete".to_string()]);
}

/// §4.5.2.a: the volume may have been removed from the server (reclaimed,
/// or already deleted by a prior attempt) by the time the closure runs;
/// `delete` must refresh first and treat a vanished volume as success
/// without ever calling `Provider.Delete`.
#[tokio::test]
async fn delete_refreshes_and_skips_when_volume_already_gone() {
    let stale = volume("volume-1", "Released", "foo.bar/baz", "Delete");
    let cluster = FakeClusterApi::new(); // nothing stored server-side
    let provider = FakeProvider::new();

    delete(&cluster, &provider, &stale, "foo.bar/baz")
        .await
        .expect("a vanished volume is treated as already deleted");

    assert!(!provider.was_deleted("volume-1"));
}

/// §4.5.2.a: the volume may have been rebound (phase no longer
/// Released/Failed) since the triggering event fired; `delete` must
/// re-evaluate `should_delete` against the refreshed record and skip the
/// backend call entirely if it no longer qualifies.
#[tokio::test]
async fn delete_refreshes_and_skips_when_no_longer_eligible() {
    let stale = volume("volume-1", "Released", "foo.bar/baz", "Delete");
    let rebound = volume("volume-1", "Bound", "foo.bar/baz", "Delete");
    let cluster = FakeClusterApi::new().with_volume(rebound);
    let provider = FakeProvider::new();

    delete(&cluster, &provider, &stale, "foo.bar/baz")
        .await
        .expect("a rebound volume is skipped, not an error");

    assert!(!provider.was_deleted("volume-1"));
    assert!(cluster.volume("volume-1").is_some());
}
