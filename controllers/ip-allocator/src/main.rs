//! IP Allocation Controller
//!
//! Reconciles namespaces and services against a pool of addresses,
//! creating and resolving `IP` claims on their behalf.

mod bootstrap;
mod cli;
mod constants;
mod error;
mod namespace_controller;
mod reaping;
mod runtime;
mod service_controller;

use std::process::ExitCode;

use kube::Client;
use tracing::{error, info};

use cli::Cli;
use error::ControllerError;
use namespace_controller::NamespaceControllerConfig;
use runtime::Runtime;
use service_controller::ServiceControllerConfig;
use store::watch_with_resync;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse_normalized();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("ip-allocator exiting: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ControllerError> {
    info!("starting ip-allocator");

    let client = build_client(&cli).await?;

    let (pool_store, pool_watch) = watch_with_resync::<crds::Pool>(
        client.clone(),
        std::time::Duration::from_secs(60),
        |_| {},
    );
    pool_store
        .wait_until_synced(std::time::Duration::from_secs(30))
        .await;

    bootstrap::bootstrap_pool(&pool_store, &cli).await?;
    // This watch only existed to back the bootstrap store; the runtime
    // opens its own once it starts.
    pool_watch.abort();

    let ns_cfg = NamespaceControllerConfig { default_pool_name: cli.pool_name.clone() };
    let svc_cfg = ServiceControllerConfig { default_pool_name: cli.pool_name.clone() };

    let runtime = Runtime::start(client, cli.threads, ns_cfg, svc_cfg).await?;
    info!("ip-allocator running with {} worker(s) per controller", cli.threads);
    runtime.run().await
}

async fn build_client(cli: &Cli) -> Result<Client, ControllerError> {
    let client = match &cli.kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .map_err(|err| ControllerError::InvalidConfig(format!("reading kubeconfig {path}: {err}")))?;
            let options = kube::config::KubeConfigOptions::default();
            let config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|err| ControllerError::InvalidConfig(format!("building client config: {err}")))?;
            Client::try_from(config)
                .map_err(|err| ControllerError::InvalidConfig(format!("constructing client: {err}")))?
        }
        None => Client::try_default()
            .await
            .map_err(|err| ControllerError::InvalidConfig(format!("in-cluster client discovery: {err}")))?,
    };
    Ok(client)
}
