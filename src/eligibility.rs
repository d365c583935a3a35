//! C4 — eligibility predicates and deterministic name derivation.
//!
//! Every function here is pure: no client, no I/O, so they're trivially
//! unit-testable and safe to call on every resync-delivered duplicate event
//! without reasoning about novelty (spec §9, "Event handlers delivered
//! out-of-order").

use std::collections::HashSet;

use k8s_openapi::api::core::v1::PersistentVolume;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;

use crate::config::{
    PROVISIONED_BY_ANNOTATION_KEY, SELECTED_NODE_ANNOTATION_KEY, STORAGE_CLASS_ANNOTATION_KEY,
    STORAGE_PROVISIONER_ANNOTATION_KEY, VOLUME_NAME_PREFIX,
};

/// Returns the claim's requested storage class name, tolerating both the
/// dedicated field and the legacy annotation. Empty class is the literal
/// empty string, never `None` — only a `StorageClass` named `""` matches it.
pub fn claim_storage_class(claim: &PersistentVolumeClaim) -> String {
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.storage_class_name.clone())
        .or_else(|| annotation(claim_annotations(claim), STORAGE_CLASS_ANNOTATION_KEY))
        .unwrap_or_default()
}

/// The `storage-provisioner` annotation, used only as a fallback when the
/// class can't be resolved to a [`StorageClass`] (spec §4.4, §9).
pub fn claim_storage_provisioner_annotation(claim: &PersistentVolumeClaim) -> Option<String> {
    annotation(claim_annotations(claim), STORAGE_PROVISIONER_ANNOTATION_KEY)
}

pub fn claim_selected_node(claim: &PersistentVolumeClaim) -> Option<String> {
    annotation(claim_annotations(claim), SELECTED_NODE_ANNOTATION_KEY)
}

pub fn claim_bound_volume_name(claim: &PersistentVolumeClaim) -> Option<String> {
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.volume_name.clone())
        .filter(|name| !name.is_empty())
}

fn claim_annotations(claim: &PersistentVolumeClaim) -> Option<&std::collections::BTreeMap<String, String>> {
    claim.metadata.annotations.as_ref()
}

fn annotation(
    annotations: Option<&std::collections::BTreeMap<String, String>>,
    key: &str,
) -> Option<String> {
    annotations.and_then(|a| a.get(key).cloned())
}

/// Volume name derivation (§4.4): `"pvc-" + claim.uid`. Deterministic and
/// stable across process restarts, which is what makes the I1 "no duplicate
/// volume" invariant enforceable with a simple existence pre-check.
pub fn derive_volume_name(claim: &PersistentVolumeClaim) -> Option<String> {
    claim
        .metadata
        .uid
        .as_ref()
        .map(|uid| format!("{VOLUME_NAME_PREFIX}{uid}"))
}

/// Returns whether the `requested` access modes are satisfiable by the
/// provider's declared `supported` set. `None` means the provider didn't
/// declare a capability restriction, so anything is accepted (§4.1).
pub fn access_modes_supported(
    requested: &[String],
    supported: Option<&HashSet<String>>,
) -> bool {
    match supported {
        None => true,
        Some(supported) => requested.iter().all(|mode| supported.contains(mode)),
    }
}

/// Whether this provisioner is the one responsible for `claim`'s class: the
/// class's `provisioner` field is authoritative, falling back to the
/// `storage-provisioner` annotation only when the class can't be resolved
/// (§4.4, §9). Split out of `should_provision` so callers can tell "not
/// eligible because some other provisioner owns this claim" apart from the
/// other ineligibility reasons — the former is what the `ExternalProvisioning`
/// event (§6) is for.
pub fn provisioner_owns_claim(
    claim: &PersistentVolumeClaim,
    matching_storage_class: Option<&StorageClass>,
    this_provisioner_name: &str,
) -> bool {
    let owned_by_class = matching_storage_class
        .map(|class| class.provisioner == this_provisioner_name)
        .unwrap_or(false);
    let owned_by_annotation_fallback = matching_storage_class.is_none()
        && claim_storage_provisioner_annotation(claim).as_deref() == Some(this_provisioner_name);

    owned_by_class || owned_by_annotation_fallback
}

/// `shouldProvision` (§4.4). `existing_volume` is the local cache's lookup
/// result for the derived volume name — `Some` means a Volume with that name
/// is already known, satisfying I1's at-most-once creation guarantee.
pub fn should_provision(
    claim: &PersistentVolumeClaim,
    matching_storage_class: Option<&StorageClass>,
    this_provisioner_name: &str,
    supported_access_modes: Option<&HashSet<String>>,
    existing_volume: Option<&PersistentVolume>,
) -> bool {
    if claim_bound_volume_name(claim).is_some() {
        return false;
    }

    if existing_volume.is_some() {
        return false;
    }

    if !provisioner_owns_claim(claim, matching_storage_class, this_provisioner_name) {
        return false;
    }

    let requested_modes = claim
        .spec
        .as_ref()
        .and_then(|spec| spec.access_modes.clone())
        .unwrap_or_default();

    access_modes_supported(&requested_modes, supported_access_modes)
}

/// `shouldDelete` (§4.4). Accepts both `Released` and `Failed` phases per
/// spec's Open Question resolution (DESIGN.md records this choice).
pub fn should_delete(volume: &PersistentVolume, this_provisioner_name: &str) -> bool {
    let phase = volume
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref());
    if !matches!(phase, Some("Released") | Some("Failed")) {
        return false;
    }

    let provisioned_by = volume
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(PROVISIONED_BY_ANNOTATION_KEY));
    if provisioned_by.map(String::as_str) != Some(this_provisioner_name) {
        return false;
    }

    let reclaim_policy = volume
        .spec
        .as_ref()
        .and_then(|spec| spec.persistent_volume_reclaim_policy.as_deref());

    reclaim_policy == Some("Delete")
}
