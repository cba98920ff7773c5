//! Pool Bootstrapper: one-shot initializer for the default pool.

use std::time::Duration;

use crds::{Pool, PoolSpec};
use store::ObjectStore;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::error::ControllerError;

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Ensures the default pool exists with the addresses/ignore-list from
/// `cli`, retrying up to `cli.retry` times. Any error surviving the retry
/// ceiling is fatal at startup.
pub async fn bootstrap_pool<S>(store: &S, cli: &Cli) -> Result<(), ControllerError>
where
    S: ObjectStore<Pool>,
{
    if cli.pool_addresses.is_empty() && cli.pool_ignore_namespaces.is_empty() {
        return Err(ControllerError::InvalidConfig(
            "at least one of pool-addresses or pool-ignore-namespaces must be non-empty".into(),
        ));
    }

    let mut attempt = 0u32;
    loop {
        match try_bootstrap_once(store, cli).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < cli.retry => {
                attempt += 1;
                warn!("pool bootstrap attempt {attempt}/{} failed: {err}", cli.retry);
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(err) => return Err(ControllerError::BootstrapFailed(attempt, Box::new(err))),
        }
    }
}

async fn try_bootstrap_once<S>(store: &S, cli: &Cli) -> Result<(), ControllerError>
where
    S: ObjectStore<Pool>,
{
    match store.get(None, &cli.pool_name).await? {
        None => {
            let pool = Pool::new(&cli.pool_name, PoolSpec {
                addresses: cli.pool_addresses.clone(),
                ignore_namespaces: cli.pool_ignore_namespaces.clone(),
                ignore_namespace_annotation: false,
                assign_to_namespace: true,
                avoid_buggy_ips: true,
                avoid_gateway_ips: false,
            });
            store.create(&pool).await?;
            info!("created default pool {}", cli.pool_name);
            Ok(())
        }
        Some(mut pool) if cli.update => {
            pool.spec.addresses = cli.pool_addresses.clone();
            pool.spec.ignore_namespaces = cli.pool_ignore_namespaces.clone();
            pool.spec.assign_to_namespace = true;
            pool.spec.ignore_namespace_annotation = false;
            pool.spec.avoid_buggy_ips = true;
            store.update(&pool).await?;
            info!("refreshed default pool {} from configuration", cli.pool_name);
            Ok(())
        }
        Some(_) => {
            info!("default pool {} already exists, leaving it as-is", cli.pool_name);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use store::mock::MockStore;

    fn cli(addresses: Vec<&str>, ignore: Vec<&str>, update: bool) -> Cli {
        // `pool-addresses`/`pool-ignore-namespaces` are required flags; pass
        // placeholders to satisfy clap, then overwrite with the test's values.
        let mut cli = Cli::parse_from(["ip-allocator", "--pool-addresses=placeholder", "--pool-ignore-namespaces="]);
        cli.pool_addresses = addresses.into_iter().map(String::from).collect();
        cli.pool_ignore_namespaces = ignore.into_iter().map(String::from).collect();
        cli.update = update;
        cli
    }

    #[tokio::test]
    async fn creates_pool_when_absent() {
        let store: MockStore<Pool> = MockStore::new();
        let cli = cli(vec!["10.0.0.1-10.0.0.5"], vec![], true);
        bootstrap_pool(&store, &cli).await.expect("bootstrap succeeds");
        let pool = store
            .get(None, "default")
            .await
            .expect("get succeeds")
            .expect("pool was created");
        assert_eq!(pool.spec.addresses, vec!["10.0.0.1-10.0.0.5".to_string()]);
        assert!(pool.spec.assign_to_namespace);
    }

    #[tokio::test]
    async fn rejects_fully_empty_configuration() {
        let store: MockStore<Pool> = MockStore::new();
        let cli = cli(vec![], vec![], true);
        let err = bootstrap_pool(&store, &cli).await.expect_err("must reject empty config");
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn leaves_existing_pool_untouched_when_update_disabled() {
        let store: MockStore<Pool> = MockStore::new();
        let mut seeded = Pool::new("default", PoolSpec {
            addresses: vec!["192.168.1.1".to_string()],
            ignore_namespaces: vec![],
            ignore_namespace_annotation: false,
            assign_to_namespace: true,
            avoid_buggy_ips: true,
            avoid_gateway_ips: false,
        });
        seeded.metadata.name = Some("default".to_string());
        store.seed(None, "default", seeded);

        let cli = cli(vec!["10.0.0.1"], vec![], false);
        bootstrap_pool(&store, &cli).await.expect("bootstrap succeeds");
        let pool = store.get(None, "default").await.expect("get succeeds").expect("pool exists");
        assert_eq!(pool.spec.addresses, vec!["192.168.1.1".to_string()]);
    }
}
