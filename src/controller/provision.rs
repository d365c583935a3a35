//! Provision path (§4.5.1): resolve the storage class, build a
//! [`ProvisionRequest`], call the [`Provider`], then create the resulting
//! [`PersistentVolume`] object with retry, cleaning up the backend asset if
//! every create attempt is rejected.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{info, warn};

use crate::cluster_api::{ClusterApi, CreateOutcome, ProvisionerEvent};
use crate::config::{
    ProvisionerConfig, DEFAULT_RECLAIM_POLICY, PROVISIONED_BY_ANNOTATION_KEY,
    STORAGE_CLASS_ANNOTATION_KEY,
};
use crate::eligibility::claim_selected_node;
use crate::error::{ProviderError, ProvisionError};
use crate::provider::{Provider, ProvisionRequest, ProvisionedVolume, VolumeSource};
use crate::quantity_parser::QuantityParser;

/// Runs the full provision path for one claim. `class_name` and
/// `volume_name` are passed in already resolved so the caller (the watch
/// loop) can use the same values for its eligibility check and its
/// scheduler key without recomputing them.
pub async fn provision(
    cluster: &dyn ClusterApi,
    provider: &dyn Provider,
    config: &ProvisionerConfig,
    claim: &PersistentVolumeClaim,
    class_name: &str,
    volume_name: &str,
) -> Result<(), ProvisionError> {
    let namespace = claim.metadata.namespace.clone().unwrap_or_default();
    let claim_name = claim.metadata.name.clone().unwrap_or_default();

    let storage_class = cluster
        .get_storage_class(class_name)
        .await
        .map_err(ProvisionError::Api)?;

    let (parameters, reclaim_policy) = match &storage_class {
        Some(class) => (
            class.parameters.clone().unwrap_or_default(),
            class
                .reclaim_policy
                .clone()
                .unwrap_or_else(|| DEFAULT_RECLAIM_POLICY.to_string()),
        ),
        None if class_name.is_empty() => (BTreeMap::new(), DEFAULT_RECLAIM_POLICY.to_string()),
        None => return Err(ProvisionError::StorageClassNotFound(class_name.to_string())),
    };

    let requested_capacity = claim
        .spec
        .as_ref()
        .and_then(|spec| spec.resources.as_ref())
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get("storage"))
        .cloned()
        .unwrap_or_else(|| k8s_openapi::apimachinery::pkg::api::resource::Quantity("0".into()));

    let access_modes = claim
        .spec
        .as_ref()
        .and_then(|spec| spec.access_modes.clone())
        .unwrap_or_default();

    if let Some(supported) = provider.supported_access_modes() {
        if !access_modes.iter().all(|mode| supported.contains(mode)) {
            return Err(ProvisionError::UnsupportedAccessModes(access_modes));
        }
    }

    let request = ProvisionRequest {
        volume_name: volume_name.to_string(),
        requested_capacity: requested_capacity.clone(),
        access_modes,
        reclaim_policy,
        parameters,
        claim: claim.clone(),
        selected_node: claim_selected_node(claim),
    };

    let provisioned = match provider.provision(&request).await {
        Ok(provisioned) => provisioned,
        Err(error) => {
            let _ = cluster
                .record_claim_event(
                    &namespace,
                    &claim_name,
                    ProvisionerEvent::ProvisioningFailed {
                        reason: error.to_string(),
                    },
                )
                .await;
            return Err(ProvisionError::Provider(error));
        }
    };

    warn_if_undersized(volume_name, &requested_capacity, &provisioned);

    let volume = build_volume(config, claim, class_name, volume_name, &provisioned);

    match create_volume_with_retry(cluster, config, &volume).await {
        Ok(()) => {
            let _ = cluster
                .record_claim_event(
                    &namespace,
                    &claim_name,
                    ProvisionerEvent::ProvisioningSucceeded {
                        volume_name: volume_name.to_string(),
                    },
                )
                .await;
            info!(volume = %volume_name, claim = %claim_name, "provisioned volume");
            Ok(())
        }
        Err(create_error) => {
            warn!(volume = %volume_name, error = %create_error, "all create attempts rejected, cleaning up backend asset");
            match cleanup_orphaned_asset(provider, config, &volume).await {
                Ok(()) => Err(ProvisionError::Api(create_error)),
                Err(cleanup_error) => {
                    let reason = format!(
                        "create failed ({create_error}), cleanup also failed ({cleanup_error})"
                    );
                    let _ = cluster
                        .record_claim_event(
                            &namespace,
                            &claim_name,
                            ProvisionerEvent::ProvisioningCleanupFailed {
                                reason: reason.clone(),
                            },
                        )
                        .await;
                    Err(ProvisionError::OrphanedAsset(reason))
                }
            }
        }
    }
}

fn warn_if_undersized(
    volume_name: &str,
    requested: &k8s_openapi::apimachinery::pkg::api::resource::Quantity,
    provisioned: &ProvisionedVolume,
) {
    if let (Ok(Some(requested_bytes)), Ok(Some(final_bytes))) =
        (requested.to_bytes(), provisioned.capacity.to_bytes())
    {
        if final_bytes < requested_bytes {
            warn!(
                volume = %volume_name,
                requested_bytes,
                final_bytes,
                "provider returned capacity smaller than requested"
            );
        }
    }
}

fn build_volume(
    config: &ProvisionerConfig,
    claim: &PersistentVolumeClaim,
    class_name: &str,
    volume_name: &str,
    provisioned: &ProvisionedVolume,
) -> PersistentVolume {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        PROVISIONED_BY_ANNOTATION_KEY.to_string(),
        config.provisioner_name.clone(),
    );
    annotations.insert(
        STORAGE_CLASS_ANNOTATION_KEY.to_string(),
        class_name.to_string(),
    );

    let mut spec = PersistentVolumeSpec {
        access_modes: Some(provisioned.access_modes.clone()),
        capacity: Some(BTreeMap::from([(
            "storage".to_string(),
            provisioned.capacity.clone(),
        )])),
        persistent_volume_reclaim_policy: Some(provisioned.reclaim_policy.clone()),
        storage_class_name: Some(class_name.to_string()),
        claim_ref: Some(ObjectReference {
            kind: Some("PersistentVolumeClaim".into()),
            namespace: claim.metadata.namespace.clone(),
            name: claim.metadata.name.clone(),
            uid: claim.metadata.uid.clone(),
            ..Default::default()
        }),
        node_affinity: provisioned.node_affinity.clone(),
        mount_options: provisioned.mount_options.clone(),
        ..Default::default()
    };

    match &provisioned.source {
        VolumeSource::HostPath(source) => spec.host_path = Some(source.clone()),
        VolumeSource::Nfs(source) => spec.nfs = Some(source.clone()),
        VolumeSource::Local(source) => spec.local = Some(source.clone()),
        VolumeSource::Csi(source) => spec.csi = Some(source.clone()),
    }

    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(volume_name.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

/// §4.5.1.e: retries the object-create call `create_provisioned_pv_retry_count`
/// times, `AlreadyExists` (another replica, or our own earlier attempt,
/// already created it) counts as success.
async fn create_volume_with_retry(
    cluster: &dyn ClusterApi,
    config: &ProvisionerConfig,
    volume: &PersistentVolume,
) -> Result<(), String> {
    let mut last_error = String::new();

    for attempt in 1..=config.create_provisioned_pv_retry_count {
        match cluster.create_volume(volume).await {
            Ok(CreateOutcome::Created | CreateOutcome::AlreadyExists) => return Ok(()),
            Err(error) => {
                last_error = error;
                warn!(attempt, error = %last_error, "volume create attempt failed");
                if attempt < config.create_provisioned_pv_retry_count {
                    tokio::time::sleep(config.create_provisioned_pv_interval()).await;
                }
            }
        }
    }

    Err(last_error)
}

/// §4.5.1.f: best-effort removal of the backend asset after every create
/// attempt was rejected, so the volume doesn't leak. Retries up to
/// `create_provisioned_pv_retry_count` times, mirroring
/// `create_volume_with_retry`, before giving up and surfacing
/// `ProvisioningCleanupFailed` to the caller.
async fn cleanup_orphaned_asset(
    provider: &dyn Provider,
    config: &ProvisionerConfig,
    volume: &PersistentVolume,
) -> Result<(), ProviderError> {
    let mut last_error = None;

    for attempt in 1..=config.create_provisioned_pv_retry_count {
        match provider.delete(volume).await {
            Ok(_) => return Ok(()),
            Err(error) => {
                warn!(attempt, error = %error, "cleanup delete attempt failed");
                last_error = Some(error);
                if attempt < config.create_provisioned_pv_retry_count {
                    tokio::time::sleep(config.create_provisioned_pv_interval()).await;
                }
            }
        }
    }

    Err(last_error.expect("loop runs at least once since retry_count is always >= 1"))
}
