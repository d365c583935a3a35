//! C6 — leader election for active-passive redundancy (spec §9: "the
//! anticipated fallback is a hand-rolled Lease using the same create/patch
//! pattern as the identity-annotation and node-lease code already in this
//! codebase family"). `kube`'s runtime offers no ready-made leader-election
//! primitive, so this follows the create-then-renew Lease pattern krustlet's
//! node module uses for node heartbeat leases, adapted to holder-identity
//! semantics: whoever holds an unexpired lease with their own identity is
//! leader; an expired lease is up for grabs via an atomic compare-and-swap
//! update.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

/// Outcome of a [`LeaseApi::create`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseCreateOutcome {
    Created,
    /// Another identity won the creation race.
    Conflict,
}

/// The narrow Lease API boundary `LeaderElector` is generic over — same
/// pattern as [`crate::provider::Provider`] and [`crate::cluster_api::ClusterApi`],
/// so the acquire/renew/expiry logic can be exercised against an in-memory
/// fake instead of a real API server.
#[async_trait]
pub trait LeaseApi: Send + Sync {
    async fn get(&self) -> Result<Option<Lease>, String>;
    async fn create(&self, lease: serde_json::Value) -> Result<LeaseCreateOutcome, String>;
    async fn patch(&self, lease: serde_json::Value) -> Result<(), String>;
}

/// Production [`LeaseApi`] backed by a real [`kube::Client`].
pub struct KubeLeaseApi {
    client: Client,
    namespace: String,
    lease_name: String,
}

impl KubeLeaseApi {
    pub fn new(client: Client, namespace: impl Into<String>, lease_name: impl Into<String>) -> Self {
        KubeLeaseApi {
            client,
            namespace: namespace.into(),
            lease_name: lease_name.into(),
        }
    }

    fn leases(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl LeaseApi for KubeLeaseApi {
    async fn get(&self) -> Result<Option<Lease>, String> {
        self.leases()
            .get_opt(&self.lease_name)
            .await
            .map_err(|e| e.to_string())
    }

    async fn create(&self, lease: serde_json::Value) -> Result<LeaseCreateOutcome, String> {
        let lease: Lease = serde_json::from_value(lease)
            .expect("lease definition is always valid JSON for Lease");
        match self.leases().create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(LeaseCreateOutcome::Created),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                Ok(LeaseCreateOutcome::Conflict)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    async fn patch(&self, lease: serde_json::Value) -> Result<(), String> {
        self.leases()
            .patch(&self.lease_name, &PatchParams::default(), &Patch::Merge(&lease))
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Runs `on_leader` for as long as this process holds the lease, and stops
/// (without returning) while it doesn't. Consumers that want to react to
/// losing leadership should make `on_leader`'s future cancellation-safe, the
/// same contract `Scheduler::wait` relies on for graceful shutdown.
pub struct LeaderElector {
    lease_api: Arc<dyn LeaseApi>,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
}

impl LeaderElector {
    pub fn new(
        lease_api: Arc<dyn LeaseApi>,
        lease_name: impl Into<String>,
        identity: impl Into<String>,
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_period: Duration,
    ) -> Self {
        LeaderElector {
            lease_api,
            lease_name: lease_name.into(),
            identity: identity.into(),
            lease_duration,
            renew_deadline,
            retry_period,
        }
    }

    /// Attempts to become leader, then calls `on_leader` once acquired,
    /// retrying renewal every `retry_period` until either renewal is
    /// rejected (another identity won a race) or `on_leader` returns.
    ///
    /// This does not itself loop forever on failure to acquire; callers
    /// drive the retry-until-acquired loop so they can observe
    /// candidate/follower transitions (e.g. to log them) between attempts.
    pub async fn run_while_leader<F, Fut>(&self, on_leader: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => break,
                Ok(false) => {
                    debug!(identity = %self.identity, "not leader, waiting");
                }
                Err(error) => {
                    warn!(error = %error, "leader election lease operation failed");
                }
            }
            tokio::time::sleep(self.retry_period).await;
        }

        info!(identity = %self.identity, "acquired leadership");

        let renewal = self.renew_loop();
        tokio::select! {
            _ = renewal => {
                warn!(identity = %self.identity, "lost leadership during renewal");
            }
            _ = on_leader() => {}
        }
    }

    async fn renew_loop(&self) {
        loop {
            tokio::time::sleep(self.renew_deadline).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => continue,
                Ok(false) => return,
                Err(error) => {
                    warn!(error = %error, "lease renewal failed, will retry");
                }
            }
        }
    }

    /// Returns `Ok(true)` if this identity holds the lease after the call
    /// (whether freshly acquired, renewed, or already held), `Ok(false)` if
    /// another identity holds an unexpired lease.
    async fn try_acquire_or_renew(&self) -> Result<bool, String> {
        match self.lease_api.get().await? {
            None => match self.lease_api.create(self.lease_definition(None)).await? {
                LeaseCreateOutcome::Created => Ok(true),
                // Lost the creation race; fall through as a normal renewal
                // attempt against whatever now exists.
                LeaseCreateOutcome::Conflict => Ok(false),
            },
            Some(existing) => {
                let held_by = existing
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.holder_identity.clone());
                let expired = self.is_expired(&existing);

                if held_by.as_deref() == Some(self.identity.as_str()) || expired {
                    let lease = self.lease_definition(existing.metadata.resource_version.clone());
                    self.lease_api.patch(lease).await?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn is_expired(&self, lease: &Lease) -> bool {
        let spec = match lease.spec.as_ref() {
            Some(spec) => spec,
            None => return true,
        };
        let renew_time = match spec.renew_time.as_ref() {
            Some(time) => time.0,
            None => return true,
        };
        let duration_secs = spec.lease_duration_seconds.unwrap_or(0);
        let elapsed = chrono::Utc::now().signed_duration_since(renew_time);
        elapsed.num_seconds() > i64::from(duration_secs)
    }

    fn lease_definition(&self, resource_version: Option<String>) -> serde_json::Value {
        let now = chrono::Utc::now();
        let mut metadata = serde_json::json!({ "name": self.lease_name });
        if let Some(resource_version) = resource_version {
            metadata["resourceVersion"] = serde_json::Value::String(resource_version);
        }
        serde_json::json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": metadata,
            "spec": {
                "holderIdentity": self.identity,
                "leaseDurationSeconds": self.lease_duration.as_secs() as i32,
                "acquireTime": MicroTime(now),
                "renewTime": MicroTime(now),
            }
        })
    }
}
