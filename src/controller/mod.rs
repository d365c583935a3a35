//! C5 — the controller orchestrator. Ties the watch/cache layer (C3),
//! eligibility predicates (C4), the operation scheduler (C2), and a
//! `Provider`/`ClusterApi` pair into the provision/delete control loop
//! described in §4.5. Generalizes the teacher's `watch_resources` /
//! `process_pvc_event` / `process_pv_event` structure from btrfs-specific
//! Job deployment to direct, in-process `Provider` calls dispatched through
//! the scheduler.

pub mod delete;
pub mod provision;

use std::sync::Arc;

use futures_util::{stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::runtime::watcher::Event;
use kube::runtime::{reflector, watcher};
use kube::{Api, Client};
use tracing::{debug, info, warn};

use crate::cluster_api::{ClusterApi, ProvisionerEvent};
use crate::config::ProvisionerConfig;
use crate::eligibility::{
    claim_bound_volume_name, claim_storage_class, derive_volume_name, provisioner_owns_claim,
    should_delete, should_provision,
};
use crate::ext::ProvisionerResourceExt;
use crate::provider::Provider;
use crate::scheduler::Scheduler;

enum WatchedResource {
    Pvc(Event<PersistentVolumeClaim>),
    Pv(Event<PersistentVolume>),
}

pub struct Controller {
    client: Client,
    cluster: Arc<dyn ClusterApi>,
    provider: Arc<dyn Provider>,
    config: ProvisionerConfig,
    scheduler: Arc<Scheduler>,
}

impl Controller {
    pub fn new(
        client: Client,
        cluster: Arc<dyn ClusterApi>,
        provider: Arc<dyn Provider>,
        config: ProvisionerConfig,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(
            config.fail_retry_threshold(),
            config.exponential_backoff_on_error,
        ));
        Controller {
            client,
            cluster,
            provider,
            config,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Runs the watch loop and the periodic resync ticker side by side.
    /// Only returns on a stream error; `kube::runtime::watcher` already
    /// retries transient connection failures on its own, so a returned
    /// error here means the stream was terminated in a way that needs a
    /// caller-level decision (restart the whole controller, or exit).
    pub async fn run(&self) -> Result<(), String> {
        info!(provisioner = %self.config.provisioner_name, "controller started");

        let claims_api = Api::<PersistentVolumeClaim>::all(self.client.clone());
        let volumes_api = Api::<PersistentVolume>::all(self.client.clone());

        let (claim_store, claim_writer) = reflector::store();
        let (volume_store, volume_writer) = reflector::store();

        let claim_stream = reflector(claim_writer, watcher(claims_api, watcher::Config::default()))
            .map_ok(WatchedResource::Pvc);
        let volume_stream =
            reflector(volume_writer, watcher(volumes_api, watcher::Config::default()))
                .map_ok(WatchedResource::Pv);

        let watch = async {
            let stream = stream::select_all(vec![claim_stream.boxed(), volume_stream.boxed()]);
            tokio::pin!(stream);

            while let Some(event) = stream.try_next().await.map_err(|e| e.to_string())? {
                match event {
                    WatchedResource::Pvc(event) => {
                        for claim in event.into_iter_applied() {
                            self.process_claim(&claim).await;
                        }
                    }
                    WatchedResource::Pv(event) => {
                        for volume in event.into_iter_applied() {
                            self.process_volume(&volume).await;
                        }
                    }
                }
            }

            Ok::<(), String>(())
        };

        let resync = async {
            let mut ticker = tokio::time::interval(self.config.resync_period());
            ticker.tick().await; // first tick fires immediately; the watch stream already covers the initial list
            loop {
                ticker.tick().await;
                debug!("resync tick");
                for claim in claim_store.state() {
                    self.process_claim(&claim).await;
                }
                for volume in volume_store.state() {
                    self.process_volume(&volume).await;
                }
            }
        };

        tokio::select! {
            result = watch => result,
            _ = resync => Ok(()),
        }
    }

    async fn process_claim(&self, claim: &PersistentVolumeClaim) {
        let claim_name = claim.full_name();

        if claim_bound_volume_name(claim).is_some() {
            return;
        }

        let class_name = claim_storage_class(claim);
        let volume_name = match derive_volume_name(claim) {
            Some(name) => name,
            None => {
                debug!(claim = %claim_name, "claim has no uid yet, skipping");
                return;
            }
        };

        let storage_class = match self.cluster.get_storage_class(&class_name).await {
            Ok(class) => class,
            Err(error) => {
                warn!(claim = %claim_name, error = %error, "failed to look up storage class");
                return;
            }
        };

        let existing_volume = match self.cluster.get_volume(&volume_name).await {
            Ok(volume) => volume,
            Err(error) => {
                warn!(claim = %claim_name, error = %error, "failed to look up volume");
                return;
            }
        };

        let eligible = should_provision(
            claim,
            storage_class.as_ref(),
            &self.config.provisioner_name,
            self.provider.supported_access_modes().as_ref(),
            existing_volume.as_ref(),
        );

        if !eligible {
            // Only the "some other provisioner owns this claim" reason is
            // worth surfacing to the user (§6 `ExternalProvisioning`) — a
            // claim that's already bound, already has a volume, or requests
            // unsupported access modes isn't "noticed but foreign", it's
            // just not actionable right now.
            if existing_volume.is_none()
                && !provisioner_owns_claim(claim, storage_class.as_ref(), &self.config.provisioner_name)
            {
                let namespace = claim.metadata.namespace.clone().unwrap_or_default();
                let name = claim.metadata.name.clone().unwrap_or_default();
                let _ = self
                    .cluster
                    .record_claim_event(&namespace, &name, ProvisionerEvent::ExternalProvisioning)
                    .await;
            }
            return;
        }

        let cluster = Arc::clone(&self.cluster);
        let provider = Arc::clone(&self.provider);
        let config = self.config.clone();
        let namespace = claim.metadata.namespace.clone().unwrap_or_default();
        let name = claim.metadata.name.clone().unwrap_or_default();
        let uid = claim.metadata.uid.clone().unwrap_or_default();
        let key = format!("provision-{namespace}/{name}[{uid}]");
        let claim = claim.clone();

        self.scheduler
            .run(key, move || {
                let volume_name = volume_name;
                async move {
                    match provision::provision(
                        cluster.as_ref(),
                        provider.as_ref(),
                        &config,
                        &claim,
                        &class_name,
                        &volume_name,
                    )
                    .await
                    {
                        Ok(()) => Ok(()),
                        // §4.5.1.c / §7: ignorable and non-retryable (permanent-local,
                        // orphaned-asset) errors are done — handing them back to the
                        // scheduler as a success avoids pointless backoff for a
                        // condition that only a claim/class change can fix. Only a
                        // genuinely retryable error schedules backoff.
                        Err(error) if error.is_ignorable() || !error.is_retryable() => Ok(()),
                        Err(error) => Err(error.to_string()),
                    }
                }
            })
            .await;
    }

    async fn process_volume(&self, volume: &PersistentVolume) {
        let volume_name = volume.metadata.name.clone().unwrap_or_default();

        if !should_delete(volume, &self.config.provisioner_name) {
            return;
        }

        let cluster = Arc::clone(&self.cluster);
        let provider = Arc::clone(&self.provider);
        let provisioner_name = self.config.provisioner_name.clone();
        let uid = volume.metadata.uid.clone().unwrap_or_default();
        let volume = volume.clone();
        let key = format!("delete-{volume_name}[{uid}]");

        self.scheduler
            .run(key, move || async move {
                match delete::delete(cluster.as_ref(), provider.as_ref(), &volume, &provisioner_name)
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(error) if error.is_ignorable() || !error.is_retryable() => Ok(()),
                    Err(error) => Err(error.to_string()),
                }
            })
            .await;
    }

    /// Blocks until all in-flight scheduler operations finish (spec §5,
    /// "Cancellation"). Used by graceful shutdown in `main.rs`.
    pub async fn wait(&self) {
        self.scheduler.wait().await;
    }
}
