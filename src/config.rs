//! Constants and runtime configuration for the provisioner core.

use std::time::Duration;

use clap::Parser;

/// Annotation written on every [`k8s_openapi::api::core::v1::PersistentVolume`]
/// the core creates, naming the provisioner instance that owns it.
pub const PROVISIONED_BY_ANNOTATION_KEY: &str = "pv.kubernetes.io/provisioned-by";

/// Annotation read from claims and written on volumes, naming the storage
/// class used to provision.
pub const STORAGE_CLASS_ANNOTATION_KEY: &str = "volume.beta.kubernetes.io/storage-class";

/// Annotation read from claims: the provisioner name the caller wants to
/// service the claim. Used only as a compatibility fallback when the claim's
/// `storageClassName` can't be resolved to a [`StorageClass`](k8s_openapi::api::storage::v1::StorageClass).
pub const STORAGE_PROVISIONER_ANNOTATION_KEY: &str =
    "volume.beta.kubernetes.io/storage-provisioner";

/// Topology hint annotation read from claims.
pub const SELECTED_NODE_ANNOTATION_KEY: &str = "volume.kubernetes.io/selected-node";

/// Volume name prefix used by [`crate::eligibility::derive_volume_name`].
pub const VOLUME_NAME_PREFIX: &str = "pvc-";

/// Default reclaim policy applied when a [`StorageClass`](k8s_openapi::api::storage::v1::StorageClass)
/// does not specify one.
pub const DEFAULT_RECLAIM_POLICY: &str = "Delete";

// Event reason codes (§6).
pub const EVENT_PROVISIONING_SUCCEEDED: &str = "ProvisioningSucceeded";
pub const EVENT_PROVISIONING_FAILED: &str = "ProvisioningFailed";
pub const EVENT_PROVISIONING_CLEANUP_FAILED: &str = "ProvisioningCleanupFailed";
pub const EVENT_VOLUME_FAILED_DELETE: &str = "VolumeFailedDelete";
pub const EVENT_EXTERNAL_PROVISIONING: &str = "ExternalProvisioning";

/// Runtime configuration, one instance per [`crate::controller::Controller`].
///
/// Mirrors the teacher's CLI-driven config pattern, extended with the knobs
/// named in spec §6. Flag parsing itself (this struct's `Parser` derive) is
/// bootstrapping glue, not core — the core only ever consumes the resulting
/// `ProvisionerConfig` value.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ProvisionerConfig {
    /// Identity written into `provisioned-by` and matched against
    /// `StorageClass.provisioner`.
    #[arg(long, env = "PROVISIONER_NAME")]
    pub provisioner_name: String,

    /// Cache resync interval, in seconds.
    #[arg(long, env = "RESYNC_PERIOD_SECS", default_value_t = 900)]
    pub resync_period_secs: u64,

    /// Scheduler backoff cap for retries, in seconds.
    #[arg(long, env = "FAIL_RETRY_THRESHOLD_SECS", default_value_t = 900)]
    pub fail_retry_threshold_secs: u64,

    /// Whether the scheduler should back off exponentially on repeated
    /// failures for the same key, or retry immediately.
    #[arg(long, env = "EXPONENTIAL_BACKOFF_ON_ERROR", default_value_t = true)]
    pub exponential_backoff_on_error: bool,

    /// Leader-election lease duration, in seconds.
    #[arg(long, env = "LEASE_DURATION_SECS", default_value_t = 15)]
    pub lease_duration_secs: u64,

    /// Leader-election renew deadline, in seconds. Must be less than
    /// `lease_duration_secs`.
    #[arg(long, env = "RENEW_DEADLINE_SECS", default_value_t = 10)]
    pub renew_deadline_secs: u64,

    /// Leader-election follower poll interval, in seconds.
    #[arg(long, env = "RETRY_PERIOD_SECS", default_value_t = 2)]
    pub retry_period_secs: u64,

    /// Number of attempts to create the provisioned [`PersistentVolume`](k8s_openapi::api::core::v1::PersistentVolume)
    /// object on the API server before giving up and cleaning up the backend
    /// asset.
    #[arg(long, env = "CREATE_PROVISIONED_PV_RETRY_COUNT", default_value_t = 5)]
    pub create_provisioned_pv_retry_count: u32,

    /// Delay between create attempts, in seconds.
    #[arg(
        long,
        env = "CREATE_PROVISIONED_PV_INTERVAL_SECS",
        default_value_t = 10
    )]
    pub create_provisioned_pv_interval_secs: u64,

    /// Whether leader election is enabled. A single, non-replicated
    /// deployment can safely disable it.
    #[arg(long, env = "LEADER_ELECTION_ENABLED", default_value_t = false)]
    pub leader_election_enabled: bool,

    /// Name of the Lease object used for leader election.
    #[arg(
        long,
        env = "LEADER_ELECTION_LEASE_NAME",
        default_value = "provisioner-leader"
    )]
    pub leader_election_lease_name: String,

    /// Namespace the leader-election Lease lives in.
    #[arg(
        long,
        env = "LEADER_ELECTION_NAMESPACE",
        default_value = "kube-system"
    )]
    pub leader_election_namespace: String,
}

impl ProvisionerConfig {
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    pub fn fail_retry_threshold(&self) -> Duration {
        Duration::from_secs(self.fail_retry_threshold_secs)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn renew_deadline(&self) -> Duration {
        Duration::from_secs(self.renew_deadline_secs)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_secs(self.retry_period_secs)
    }

    pub fn create_provisioned_pv_interval(&self) -> Duration {
        Duration::from_secs(self.create_provisioned_pv_interval_secs)
    }
}
