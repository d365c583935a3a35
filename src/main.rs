use std::sync::Arc;

use color_eyre::Result;
use kube::{Client, Config};
use provisioner_core::cluster_api::KubeClusterApi;
use provisioner_core::config::ProvisionerConfig;
use provisioner_core::controller::Controller;
use provisioner_core::demo_provider::DemoProvider;
use provisioner_core::leader_election::{KubeLeaseApi, LeaderElector, LeaseApi};
use tracing::info;

use clap::Parser;

const DEMO_VOLUMES_DIR_ENV: &str = "DEMO_VOLUMES_DIR";
const DEFAULT_DEMO_VOLUMES_DIR: &str = "/tmp/storage-provisioner-demo-volumes";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ProvisionerConfig::parse();

    info!(provisioner = %config.provisioner_name, "starting storage-provisioner");

    let client = Client::try_default()
        .await
        .or_else(|_| Client::try_from(Config::incluster_env()?))?;

    let cluster = Arc::new(KubeClusterApi::new(client.clone(), &config.provisioner_name));
    let volumes_dir =
        std::env::var(DEMO_VOLUMES_DIR_ENV).unwrap_or_else(|_| DEFAULT_DEMO_VOLUMES_DIR.to_string());
    let provider = Arc::new(DemoProvider::new(volumes_dir));

    let controller = Arc::new(Controller::new(client.clone(), cluster, provider, config.clone()));

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested, waiting for in-flight operations to finish");
    };

    if config.leader_election_enabled {
        let identity = format!("{}-{}", config.provisioner_name, std::process::id());
        let lease_api: Arc<dyn LeaseApi> = Arc::new(KubeLeaseApi::new(
            client,
            config.leader_election_namespace.clone(),
            config.leader_election_lease_name.clone(),
        ));
        let elector = LeaderElector::new(
            lease_api,
            config.leader_election_lease_name.clone(),
            identity,
            config.lease_duration(),
            config.renew_deadline(),
            config.retry_period(),
        );

        let run_controller = {
            let controller = Arc::clone(&controller);
            async move {
                if let Err(error) = controller.run().await {
                    tracing::error!(error = %error, "controller loop exited with an error");
                }
            }
        };

        tokio::select! {
            _ = elector.run_while_leader(|| run_controller) => {}
            _ = shutdown => {}
        }
    } else {
        tokio::select! {
            result = controller.run() => {
                if let Err(error) = result {
                    tracing::error!(error = %error, "controller loop exited with an error");
                }
            }
            _ = shutdown => {}
        }
    }

    controller.wait().await;

    Ok(())
}
