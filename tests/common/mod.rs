//! In-memory fakes driving the orchestrator without a cluster. Lives outside
//! `src/` (under `tests/`) since `#[cfg(test)]` code in `src/` isn't visible
//! to integration tests — the same reason the `tests/common` convention
//! exists in `0xForerunner-pvc-reaper`, the pack crate this style is drawn
//! from.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    HostPathVolumeSource, PersistentVolume, PersistentVolumeClaim,
};
use k8s_openapi::api::storage::v1::StorageClass;

use provisioner_core::cluster_api::{ClusterApi, CreateOutcome, DeleteApiOutcome, ProvisionerEvent};
use provisioner_core::error::ProviderError;
use provisioner_core::provider::{DeleteOutcome, Provider, ProvisionRequest, ProvisionedVolume, VolumeSource};

#[derive(Default)]
pub struct FakeClusterApi {
    claims: Mutex<HashMap<String, PersistentVolumeClaim>>,
    volumes: Mutex<HashMap<String, PersistentVolume>>,
    storage_classes: Mutex<HashMap<String, StorageClass>>,
    pub events: Mutex<Vec<(String, String)>>,
    pub create_failures_remaining: Mutex<u32>,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage_class(self, class: StorageClass) -> Self {
        let name = class.metadata.name.clone().unwrap_or_default();
        self.storage_classes.lock().unwrap().insert(name, class);
        self
    }

    pub fn with_claim(self, claim: PersistentVolumeClaim) -> Self {
        let key = format!(
            "{}/{}",
            claim.metadata.namespace.clone().unwrap_or_default(),
            claim.metadata.name.clone().unwrap_or_default()
        );
        self.claims.lock().unwrap().insert(key, claim);
        self
    }

    pub fn with_volume(self, volume: PersistentVolume) -> Self {
        let name = volume.metadata.name.clone().unwrap_or_default();
        self.volumes.lock().unwrap().insert(name, volume);
        self
    }

    /// Makes the next N `create_volume` calls fail, to exercise the
    /// create-retry and orphan-cleanup paths.
    pub fn fail_creates(self, n: u32) -> Self {
        *self.create_failures_remaining.lock().unwrap() = n;
        self
    }

    pub fn volume(&self, name: &str) -> Option<PersistentVolume> {
        self.volumes.lock().unwrap().get(name).cloned()
    }

    pub fn event_reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(reason, _)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, String> {
        Ok(self
            .claims
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned())
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>, String> {
        Ok(self.volumes.lock().unwrap().get(name).cloned())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, String> {
        Ok(self.storage_classes.lock().unwrap().get(name).cloned())
    }

    async fn create_volume(&self, volume: &PersistentVolume) -> Result<CreateOutcome, String> {
        let mut remaining = self.create_failures_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err("simulated create failure".to_string());
        }
        drop(remaining);

        let name = volume.metadata.name.clone().unwrap_or_default();
        let mut volumes = self.volumes.lock().unwrap();
        if volumes.contains_key(&name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        volumes.insert(name, volume.clone());
        Ok(CreateOutcome::Created)
    }

    async fn delete_volume(&self, name: &str) -> Result<DeleteApiOutcome, String> {
        let removed = self.volumes.lock().unwrap().remove(name);
        Ok(if removed.is_some() {
            DeleteApiOutcome::Deleted
        } else {
            DeleteApiOutcome::NotFound
        })
    }

    async fn record_claim_event(
        &self,
        _namespace: &str,
        _name: &str,
        event: ProvisionerEvent,
    ) -> Result<(), String> {
        self.events.lock().unwrap().push(event_parts(event));
        Ok(())
    }

    async fn record_volume_event(
        &self,
        _name: &str,
        event: ProvisionerEvent,
    ) -> Result<(), String> {
        self.events.lock().unwrap().push(event_parts(event));
        Ok(())
    }
}

fn event_parts(event: ProvisionerEvent) -> (String, String) {
    let reason = match &event {
        ProvisionerEvent::ProvisioningSucceeded { .. } => "ProvisioningSucceeded",
        ProvisionerEvent::ProvisioningFailed { .. } => "ProvisioningFailed",
        ProvisionerEvent::ProvisioningCleanupFailed { .. } => "ProvisioningCleanupFailed",
        ProvisionerEvent::VolumeFailedDelete { .. } => "VolumeFailedDelete",
        ProvisionerEvent::ExternalProvisioning => "ExternalProvisioning",
    };
    (reason.to_string(), format!("{event:?}"))
}

/// A [`Provider`] whose behavior is fully dictated by the test: it can
/// succeed, fail transiently, or fail permanently, and it tracks which
/// volume names it has "created" so delete can be asserted against it.
#[derive(Default)]
pub struct FakeProvider {
    pub fail_provision: Mutex<Option<String>>,
    pub fail_delete: Mutex<Option<String>>,
    pub fail_delete_times_remaining: Mutex<u32>,
    pub provisioned: Mutex<HashSet<String>>,
    pub deleted: Mutex<HashSet<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_provision(self, reason: impl Into<String>) -> Self {
        *self.fail_provision.lock().unwrap() = Some(reason.into());
        self
    }

    pub fn failing_delete(self, reason: impl Into<String>) -> Self {
        *self.fail_delete.lock().unwrap() = Some(reason.into());
        self
    }

    /// Makes the next N `delete` calls fail transiently before succeeding,
    /// to exercise cleanup/delete retry loops.
    pub fn failing_delete_times(self, n: u32) -> Self {
        *self.fail_delete_times_remaining.lock().unwrap() = n;
        self
    }

    pub fn was_provisioned(&self, volume_name: &str) -> bool {
        self.provisioned.lock().unwrap().contains(volume_name)
    }

    pub fn was_deleted(&self, volume_name: &str) -> bool {
        self.deleted.lock().unwrap().contains(volume_name)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedVolume, ProviderError> {
        if let Some(reason) = self.fail_provision.lock().unwrap().clone() {
            return Err(ProviderError::Transient(reason));
        }

        self.provisioned
            .lock()
            .unwrap()
            .insert(request.volume_name.clone());

        Ok(ProvisionedVolume {
            source: VolumeSource::HostPath(HostPathVolumeSource {
                path: format!("/fake/{}", request.volume_name),
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
        if let Some(reason) = self.fail_delete.lock().unwrap().clone() {
            return Err(ProviderError::Transient(reason));
        }

        let mut remaining = self.fail_delete_times_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ProviderError::Transient("simulated delete failure".into()));
        }
        drop(remaining);

        let name = volume.metadata.name.clone().unwrap_or_default();
        self.deleted.lock().unwrap().insert(name);
        Ok(DeleteOutcome::Deleted)
    }
}
