//! Delete path (§4.5.2): ask the provider to remove the backend asset, then
//! delete the `PersistentVolume` object. The provider call comes first so a
//! crash between the two steps leaves an orphaned API object rather than an
//! orphaned backend asset — the next resync's `should_delete` pass retries
//! deletion against the same object, satisfying the idempotence invariant.

use tracing::{debug, info, warn};

use crate::cluster_api::{ClusterApi, DeleteApiOutcome, ProvisionerEvent};
use crate::eligibility::should_delete;
use crate::error::DeleteError;
use crate::provider::Provider;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::ResourceExt;

pub async fn delete(
    cluster: &dyn ClusterApi,
    provider: &dyn Provider,
    volume: &PersistentVolume,
    provisioner_name: &str,
) -> Result<(), DeleteError> {
    let volume_name = volume.name_any();

    // §4.5.2.a: the volume may have been reclaimed or rebound since the
    // triggering event fired; refresh it and re-check eligibility before
    // touching the backend.
    let volume = match cluster.get_volume(&volume_name).await {
        Ok(Some(refreshed)) => refreshed,
        Ok(None) => {
            info!(volume = %volume_name, "volume no longer present, nothing to delete");
            return Ok(());
        }
        Err(error) => {
            warn!(volume = %volume_name, error = %error, "failed to refresh volume before delete");
            return Err(DeleteError::Api(error));
        }
    };

    if !should_delete(&volume, provisioner_name) {
        debug!(volume = %volume_name, "volume no longer delete-eligible after refresh, skipping");
        return Ok(());
    }

    if let Err(error) = provider.delete(&volume).await {
        if !error.is_ignorable() {
            warn!(volume = %volume_name, error = %error, "provider delete failed");
            let _ = cluster
                .record_volume_event(
                    &volume_name,
                    ProvisionerEvent::VolumeFailedDelete {
                        reason: error.to_string(),
                    },
                )
                .await;
        }
        return Err(DeleteError::Provider(error));
    }

    match cluster.delete_volume(&volume_name).await {
        Ok(DeleteApiOutcome::Deleted | DeleteApiOutcome::NotFound) => {
            info!(volume = %volume_name, "deleted volume");
            Ok(())
        }
        Err(error) => {
            warn!(volume = %volume_name, error = %error, "failed to delete volume object after backend cleanup");
            Err(DeleteError::Api(error))
        }
    }
}
