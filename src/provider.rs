//! C1 — the Provider interface. A backend (NFS, iSCSI, gluster-block, EFS,
//! local-volume, ...) satisfies this narrow capability trait; the core never
//! knows or cares which. See `crate::demo_provider` for a trivial
//! implementation used only to exercise the engine in tests and the `main`
//! binary — it is not itself a real backend.

use std::collections::BTreeMap;
use std::collections::HashSet;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, HostPathVolumeSource, LocalVolumeSource, NFSVolumeSource,
    PersistentVolume, PersistentVolumeClaim,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::error::ProviderError;

/// The backend-specific placement of a provisioned volume. `k8s_openapi`
/// flattens these directly onto `PersistentVolumeSpec` rather than nesting
/// them under one source type, so the orchestrator matches on this enum to
/// set the one spec field that applies (§4.5.1.d).
#[derive(Debug, Clone)]
pub enum VolumeSource {
    HostPath(HostPathVolumeSource),
    Nfs(NFSVolumeSource),
    Local(LocalVolumeSource),
    Csi(CSIPersistentVolumeSource),
}

/// Everything a [`Provider`] needs to provision a volume for a claim.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// The name the core has already derived for the volume (§4.4). The
    /// provider must use this name for its backing asset identity so that
    /// a retried provision finds the same asset idempotently.
    pub volume_name: String,
    pub requested_capacity: Quantity,
    pub access_modes: Vec<String>,
    pub reclaim_policy: String,
    pub parameters: BTreeMap<String, String>,
    pub claim: PersistentVolumeClaim,
    pub selected_node: Option<String>,
}

/// What a successful [`Provider::provision`] call hands back. The
/// orchestrator decorates this with `claim-ref` and the two required
/// annotations before creating the `PersistentVolume` object (§4.5.1.d).
#[derive(Debug, Clone)]
pub struct ProvisionedVolume {
    /// Backend-specific source block (a `local` `hostPath`, an NFS export, an
    /// iSCSI target, ...). Opaque to the core.
    pub source: VolumeSource,
    /// Final capacity, must be `>=` the requested capacity.
    pub capacity: Quantity,
    pub access_modes: Vec<String>,
    pub reclaim_policy: String,
    pub node_affinity: Option<k8s_openapi::api::core::v1::VolumeNodeAffinity>,
    pub mount_options: Option<Vec<String>>,
}

/// Outcome of a [`Provider::delete`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The backend asset was removed, or was already gone.
    Deleted,
}

/// The backend capability contract (C1). Implementations must be safe to
/// call concurrently for distinct inputs — the core only ever serializes
/// calls that share an operation key (§4.2).
#[async_trait]
pub trait Provider: Send + Sync {
    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedVolume, ProviderError>;

    async fn delete(&self, volume: &PersistentVolume) -> Result<DeleteOutcome, ProviderError>;

    /// Optional capability query. When present, the core rejects claims
    /// whose requested access modes are not a subset, before calling
    /// `provision` (§4.1).
    fn supported_access_modes(&self) -> Option<HashSet<String>> {
        None
    }
}
