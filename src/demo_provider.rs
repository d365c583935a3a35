//! A trivial, intentionally non-production [`Provider`]. It provisions a
//! `hostPath` volume under a local base directory and deletes it by removing
//! that directory. No export/share/SDK call, no qgroup accounting, no
//! multi-node awareness — it exists only to exercise the engine (the binary's
//! default backend, and the fixture behind the integration tests) the way a
//! real NFS/iSCSI/EFS backend would plug into the same [`Provider`] trait.

use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{HostPathVolumeSource, PersistentVolume};
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::provider::{DeleteOutcome, Provider, ProvisionRequest, ProvisionedVolume, VolumeSource};

pub struct DemoProvider {
    base_dir: PathBuf,
}

impl DemoProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        DemoProvider {
            base_dir: base_dir.into(),
        }
    }

    fn volume_dir(&self, volume_name: &str) -> PathBuf {
        self.base_dir.join(volume_name)
    }
}

#[async_trait]
impl Provider for DemoProvider {
    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedVolume, ProviderError> {
        let path = self.volume_dir(&request.volume_name);

        std::fs::create_dir_all(&path)
            .map_err(|e| ProviderError::Transient(format!("failed to create {path:?}: {e}")))?;

        info!(volume = %request.volume_name, path = %path.display(), "provisioned demo volume");

        Ok(ProvisionedVolume {
            source: VolumeSource::HostPath(HostPathVolumeSource {
                path: path.to_string_lossy().into_owned(),
                type_: Some("DirectoryOrCreate".into()),
            }),
            capacity: request.requested_capacity.clone(),
            access_modes: request.access_modes.clone(),
            reclaim_policy: request.reclaim_policy.clone(),
            node_affinity: None,
            mount_options: None,
        })
    }

    async fn delete(&self, volume: &PersistentVolume) -> Result<DeleteOutcome, ProviderError> {
        let name = volume
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ProviderError::PermanentLocal("volume has no name".into()))?;
        let path = self.volume_dir(name);

        match std::fs::remove_dir_all(&path) {
            Ok(()) => debug!(path = %path.display(), "removed demo volume directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "demo volume directory already gone");
            }
            Err(e) => {
                return Err(ProviderError::Transient(format!(
                    "failed to remove {path:?}: {e}"
                )))
            }
        }

        Ok(DeleteOutcome::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn request(volume_name: &str) -> ProvisionRequest {
        ProvisionRequest {
            volume_name: volume_name.into(),
            requested_capacity: Quantity("1Gi".into()),
            access_modes: vec!["ReadWriteOnce".into()],
            reclaim_policy: "Delete".into(),
            parameters: Default::default(),
            claim: Default::default(),
            selected_node: None,
        }
    }

    #[tokio::test]
    async fn provision_creates_directory_and_delete_removes_it() {
        let temp = std::env::temp_dir().join(format!(
            "provisioner-core-test-{}",
            std::process::id()
        ));
        let provider = DemoProvider::new(&temp);

        let provisioned = provider
            .provision(&request("pvc-test-uid"))
            .await
            .expect("provision should succeed");
        let path = temp.join("pvc-test-uid");
        assert!(path.is_dir());
        assert!(matches!(provisioned.source, VolumeSource::HostPath(_)));

        let volume = PersistentVolume {
            metadata: ObjectMeta {
                name: Some("pvc-test-uid".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        provider.delete(&volume).await.expect("delete should succeed");
        assert!(!path.exists());

        // deleting again is idempotent
        provider.delete(&volume).await.expect("delete should be idempotent");

        let _ = std::fs::remove_dir_all(&temp);
    }
}
