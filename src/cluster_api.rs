//! The cluster API boundary (§6). `ClusterApi` is a narrow capability trait
//! in the same spirit as [`crate::provider::Provider`] (spec §9: "narrow
//! capability interface... no inheritance"), so the orchestrator (C5) can be
//! driven against a real cluster in production and against an in-memory
//! fake in tests without a running API server.
//!
//! The production implementation, [`KubeClusterApi`], wraps a [`kube::Client`]
//! the way the teacher's `provisioner.rs`/`storage_class_utils.rs` already
//! do, generalized from the teacher's bare free functions into one trait
//! implementation covering claims, volumes, storage classes, and event
//! recording via [`kube::runtime::events::Recorder`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::PostParams;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};

use crate::config::{
    EVENT_EXTERNAL_PROVISIONING, EVENT_PROVISIONING_CLEANUP_FAILED, EVENT_PROVISIONING_FAILED,
    EVENT_PROVISIONING_SUCCEEDED, EVENT_VOLUME_FAILED_DELETE,
};

/// Result of attempting to create a volume object (§4.5.1.e).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// `AlreadyExists` — another replica won the race. Treated as success.
    AlreadyExists,
}

/// Result of attempting to delete a volume object (§4.5.2.c).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteApiOutcome {
    Deleted,
    /// `NotFound` — treated as success.
    NotFound,
}

/// One of the five reason codes named in spec §6, carrying just enough
/// context to format a human-readable note.
#[derive(Debug, Clone)]
pub enum ProvisionerEvent {
    ProvisioningSucceeded { volume_name: String },
    ProvisioningFailed { reason: String },
    ProvisioningCleanupFailed { reason: String },
    VolumeFailedDelete { reason: String },
    ExternalProvisioning,
}

impl ProvisionerEvent {
    fn reason(&self) -> &'static str {
        match self {
            ProvisionerEvent::ProvisioningSucceeded { .. } => EVENT_PROVISIONING_SUCCEEDED,
            ProvisionerEvent::ProvisioningFailed { .. } => EVENT_PROVISIONING_FAILED,
            ProvisionerEvent::ProvisioningCleanupFailed { .. } => {
                EVENT_PROVISIONING_CLEANUP_FAILED
            }
            ProvisionerEvent::VolumeFailedDelete { .. } => EVENT_VOLUME_FAILED_DELETE,
            ProvisionerEvent::ExternalProvisioning => EVENT_EXTERNAL_PROVISIONING,
        }
    }

    fn event_type(&self) -> EventType {
        match self {
            ProvisionerEvent::ProvisioningSucceeded { .. } => EventType::Normal,
            ProvisionerEvent::ExternalProvisioning => EventType::Normal,
            _ => EventType::Warning,
        }
    }

    fn note(&self) -> Option<String> {
        match self {
            ProvisionerEvent::ProvisioningSucceeded { volume_name } => {
                Some(format!("Successfully provisioned volume {volume_name}"))
            }
            ProvisionerEvent::ProvisioningFailed { reason } => Some(reason.clone()),
            ProvisionerEvent::ProvisioningCleanupFailed { reason } => Some(reason.clone()),
            ProvisionerEvent::VolumeFailedDelete { reason } => Some(reason.clone()),
            ProvisionerEvent::ExternalProvisioning => {
                Some("claim ignored: serviced by a different provisioner".into())
            }
        }
    }
}

/// The cluster API boundary the orchestrator is generic over.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, String>;

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>, String>;

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, String>;

    async fn create_volume(&self, volume: &PersistentVolume) -> Result<CreateOutcome, String>;

    async fn delete_volume(&self, name: &str) -> Result<DeleteApiOutcome, String>;

    /// Emits an event scoped to a claim (identified by namespace/name).
    async fn record_claim_event(
        &self,
        namespace: &str,
        name: &str,
        event: ProvisionerEvent,
    ) -> Result<(), String>;

    /// Emits an event scoped to a volume.
    async fn record_volume_event(
        &self,
        name: &str,
        event: ProvisionerEvent,
    ) -> Result<(), String>;
}

/// Production [`ClusterApi`] backed by a real [`kube::Client`].
pub struct KubeClusterApi {
    client: Client,
    reporter: Reporter,
}

impl KubeClusterApi {
    pub fn new(client: Client, provisioner_name: &str) -> Self {
        KubeClusterApi {
            client,
            reporter: provisioner_name.into(),
        }
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn volumes(&self) -> Api<PersistentVolume> {
        Api::all(self.client.clone())
    }

    fn storage_classes(&self) -> Api<StorageClass> {
        Api::all(self.client.clone())
    }

    fn publish(&self, object_ref: ObjectReference, event: ProvisionerEvent) -> PublishFuture {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object_ref);
        let kube_event = Event {
            type_: event.event_type(),
            reason: event.reason().to_string(),
            note: event.note(),
            action: "Provisioning".to_string(),
            secondary: None,
        };
        PublishFuture {
            recorder,
            event: kube_event,
        }
    }
}

/// Small adapter so `publish` can return a boxed future without pulling in
/// an extra combinator dependency just for this one call site.
struct PublishFuture {
    recorder: Recorder,
    event: Event,
}

impl PublishFuture {
    async fn run(self) -> Result<(), String> {
        self.recorder
            .publish(self.event)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, String> {
        self.claims(namespace)
            .get_opt(name)
            .await
            .map_err(|e| e.to_string())
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>, String> {
        self.volumes().get_opt(name).await.map_err(|e| e.to_string())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, String> {
        self.storage_classes()
            .get_opt(name)
            .await
            .map_err(|e| e.to_string())
    }

    async fn create_volume(&self, volume: &PersistentVolume) -> Result<CreateOutcome, String> {
        match self.volumes().create(&PostParams::default(), volume).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    async fn delete_volume(&self, name: &str) -> Result<DeleteApiOutcome, String> {
        match self
            .volumes()
            .delete(name, &kube::api::DeleteParams::default())
            .await
        {
            Ok(_) => Ok(DeleteApiOutcome::Deleted),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                Ok(DeleteApiOutcome::NotFound)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    async fn record_claim_event(
        &self,
        namespace: &str,
        name: &str,
        event: ProvisionerEvent,
    ) -> Result<(), String> {
        let claim = self
            .claims(namespace)
            .get_opt(name)
            .await
            .map_err(|e| e.to_string())?;
        let object_ref = match claim {
            Some(claim) => claim.object_ref(&()),
            None => return Ok(()),
        };
        self.publish(object_ref, event).run().await
    }

    async fn record_volume_event(
        &self,
        name: &str,
        event: ProvisionerEvent,
    ) -> Result<(), String> {
        let volume = self.volumes().get_opt(name).await.map_err(|e| e.to_string())?;
        let object_ref = match volume {
            Some(volume) => volume.object_ref(&()),
            None => return Ok(()),
        };
        self.publish(object_ref, event).run().await
    }
}
