//! Namespace Controller (design §4.4): creates/deletes IP claims to match
//! a namespace's declared count, handles pool swaps, and publishes the
//! resolved address list back onto the namespace's annotations.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use tracing::{debug, info};
use uuid::Uuid;

use crds::{Pool, IP, IPSpec, IPStatus, IPPhase};
use store::ObjectStore;

use crate::constants::{
    ANN_IPS, ANN_LATEST_IP, ANN_LATEST_POOL, ANN_NUMBER_OF_IP, ANN_POOL_NAME, DEFAULT_NUMBER_OF_IP,
};
use crate::error::ControllerError;
use crate::reaping::delete_claim;

/// Static configuration the namespace controller needs beyond the object
/// store: the pool to default to when a namespace carries no pool
/// annotation yet.
#[derive(Debug, Clone)]
pub struct NamespaceControllerConfig {
    pub default_pool_name: String,
}

/// Reconciles the namespace named `key` against its declared pool and
/// claim count. Idempotent: re-running against an unchanged namespace and
/// claim set is a no-op beyond the final conditional update.
pub async fn reconcile_namespace<NsStore, PoolStore, IpStore>(
    key: &str,
    ns_store: &NsStore,
    pool_store: &PoolStore,
    ip_store: &IpStore,
    cfg: &NamespaceControllerConfig,
) -> Result<(), ControllerError>
where
    NsStore: ObjectStore<Namespace>,
    PoolStore: ObjectStore<Pool>,
    IpStore: ObjectStore<IP>,
{
    let Some(mut ns) = ns_store.get(None, key).await? else {
        debug!("namespace {key} not found, dropping");
        return Ok(());
    };
    let ns_name = ns.name_any();

    let annotations = ns.annotations_mut();
    normalize_ip_number(annotations);
    let pool_name = normalize_pool_name(annotations, &cfg.default_pool_name);
    let want = parse_ip_number(annotations);

    let pool = pool_store
        .get(None, &pool_name)
        .await?
        .ok_or_else(|| ControllerError::PoolNotFound(pool_name.clone()))?;

    if pool.spec.ignore_namespaces.iter().any(|n| n == &ns_name) || !pool.spec.assign_to_namespace {
        debug!("namespace {ns_name} skipped by pool {pool_name} policy");
        return Ok(());
    }

    if let Some(latest_pool) = ns.annotations().get(ANN_LATEST_POOL).cloned() {
        cleanup_pool_swap(ip_store, &ns_name, &latest_pool).await?;
        ns.annotations_mut().remove(ANN_LATEST_POOL);
    }

    let owner = ns.controller_owner_ref(&());
    sync_claims(ip_store, &ns_name, &pool_name, want, owner).await?;

    let (allocated_ips, latest_ip) = propagate_status(ip_store, &ns_name, &pool_name).await?;
    let annotations = ns.annotations_mut();
    if want == 0 || allocated_ips.is_empty() {
        annotations.remove(ANN_IPS);
        annotations.remove(ANN_LATEST_IP);
    } else {
        annotations.insert(ANN_IPS.to_string(), allocated_ips.join(","));
        annotations.insert(ANN_LATEST_IP.to_string(), latest_ip.unwrap_or_default());
    }

    ns_store.update(&ns).await?;
    Ok(())
}

/// If `allocate-ip-number` is missing or non-integer, rewrites it to the
/// default. Malformed counts self-heal silently rather than surfacing as
/// an error.
fn normalize_ip_number(annotations: &mut BTreeMap<String, String>) {
    let valid = annotations
        .get(ANN_NUMBER_OF_IP)
        .is_some_and(|v| v.parse::<u32>().is_ok());
    if !valid {
        annotations.insert(ANN_NUMBER_OF_IP.to_string(), DEFAULT_NUMBER_OF_IP.to_string());
    }
}

fn normalize_pool_name(annotations: &mut BTreeMap<String, String>, default_pool: &str) -> String {
    if let Some(name) = annotations.get(ANN_POOL_NAME) {
        return name.clone();
    }
    annotations.insert(ANN_POOL_NAME.to_string(), default_pool.to_string());
    default_pool.to_string()
}

fn parse_ip_number(annotations: &BTreeMap<String, String>) -> u32 {
    annotations
        .get(ANN_NUMBER_OF_IP)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_NUMBER_OF_IP)
}

async fn cleanup_pool_swap<IpStore>(
    ip_store: &IpStore,
    ns_name: &str,
    latest_pool: &str,
) -> Result<(), ControllerError>
where
    IpStore: ObjectStore<IP>,
{
    let claims = ip_store.list(Some(ns_name)).await?;
    for claim in claims.iter().filter(|c| c.spec.pool_name == latest_pool) {
        delete_claim(ip_store, ns_name, &claim.name_any()).await?;
    }
    info!("cleaned up {} claims from swapped-out pool {latest_pool} in {ns_name}", claims.len());
    Ok(())
}

fn last_update_time(claim: &IP) -> DateTime<Utc> {
    claim
        .status
        .as_ref()
        .and_then(|s| s.last_update_time)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

async fn claims_for_pool<IpStore>(
    ip_store: &IpStore,
    ns_name: &str,
    pool_name: &str,
) -> Result<Vec<IP>, ControllerError>
where
    IpStore: ObjectStore<IP>,
{
    let mut claims: Vec<IP> = ip_store
        .list(Some(ns_name))
        .await?
        .into_iter()
        .filter(|c| c.spec.pool_name == pool_name)
        .collect();
    claims.sort_by_key(last_update_time);
    Ok(claims)
}

async fn sync_claims<IpStore>(
    ip_store: &IpStore,
    ns_name: &str,
    pool_name: &str,
    want: u32,
    owner: Option<OwnerReference>,
) -> Result<(), ControllerError>
where
    IpStore: ObjectStore<IP>,
{
    let claims = claims_for_pool(ip_store, ns_name, pool_name).await?;
    let have = u32::try_from(claims.len()).unwrap_or(u32::MAX);

    if want > have {
        for _ in 0..(want - have) {
            let mut claim = IP::new(&Uuid::new_v4().to_string(), IPSpec {
                pool_name: pool_name.to_string(),
            });
            claim.metadata.namespace = Some(ns_name.to_string());
            claim.metadata.owner_references = owner.clone().map(|o| vec![o]);
            claim.status = Some(IPStatus::default());
            ip_store.create(&claim).await?;
        }
    } else if have > want {
        // Delete from the tail of the age-sorted (ascending) list — the
        // newest claims.
        for claim in claims.iter().rev().take((have - want) as usize) {
            delete_claim(ip_store, ns_name, &claim.name_any()).await?;
        }
    }
    Ok(())
}

async fn propagate_status<IpStore>(
    ip_store: &IpStore,
    ns_name: &str,
    pool_name: &str,
) -> Result<(Vec<String>, Option<String>), ControllerError>
where
    IpStore: ObjectStore<IP>,
{
    let claims = claims_for_pool(ip_store, ns_name, pool_name).await?;
    let mut addresses = Vec::new();
    for claim in &claims {
        if claim.metadata.deletion_timestamp.is_some() {
            continue;
        }
        let Some(status) = &claim.status else { continue };
        if status.phase == IPPhase::Failed {
            continue;
        }
        // A claim not yet resolved by the resolver carries an empty
        // address; that's not an error, just not ready yet.
        if status.address.is_empty() {
            continue;
        }
        IpAddr::from_str(&status.address).map_err(|_| {
            ControllerError::UnparseableAddress(claim.name_any(), status.address.clone())
        })?;
        addresses.push(status.address.clone());
    }
    let latest = addresses.last().cloned();
    Ok((addresses, latest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::mock::MockStore;

    fn pool(name: &str, addresses: Vec<&str>, assign: bool, ignore: Vec<&str>) -> Pool {
        let mut p = Pool::new(name, crds::PoolSpec {
            addresses: addresses.into_iter().map(String::from).collect(),
            ignore_namespaces: ignore.into_iter().map(String::from).collect(),
            ignore_namespace_annotation: false,
            assign_to_namespace: assign,
            avoid_buggy_ips: true,
            avoid_gateway_ips: false,
        });
        p.metadata.name = Some(name.to_string());
        p
    }

    fn namespace(name: &str) -> Namespace {
        let mut ns = Namespace::default();
        ns.metadata.name = Some(name.to_string());
        ns
    }

    fn cfg() -> NamespaceControllerConfig {
        NamespaceControllerConfig { default_pool_name: "default".to_string() }
    }

    #[tokio::test]
    async fn happy_path_creates_one_claim() {
        let ns_store: MockStore<Namespace> = MockStore::new();
        let pool_store: MockStore<Pool> = MockStore::new();
        let ip_store: MockStore<IP> = MockStore::new();

        ns_store.seed(None, "ns-a", namespace("ns-a"));
        pool_store.seed(None, "default", pool("default", vec!["172.22.132.10-172.22.132.15"], true, vec![]));

        reconcile_namespace("ns-a", &ns_store, &pool_store, &ip_store, &cfg())
            .await
            .expect("reconcile succeeds");

        let claims = ip_store.list(Some("ns-a")).await.expect("list succeeds");
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].spec.pool_name, "default");
    }

    #[tokio::test]
    async fn count_zero_clears_annotations() {
        let ns_store: MockStore<Namespace> = MockStore::new();
        let pool_store: MockStore<Pool> = MockStore::new();
        let ip_store: MockStore<IP> = MockStore::new();

        let mut ns = namespace("ns-a");
        ns.annotations_mut().insert(ANN_NUMBER_OF_IP.to_string(), "0".to_string());
        ns_store.seed(None, "ns-a", ns);
        pool_store.seed(None, "default", pool("default", vec!["172.22.132.10"], true, vec![]));

        reconcile_namespace("ns-a", &ns_store, &pool_store, &ip_store, &cfg())
            .await
            .expect("reconcile succeeds");

        let claims = ip_store.list(Some("ns-a")).await.expect("list succeeds");
        assert!(claims.is_empty());
        let ns = ns_store.get(None, "ns-a").await.expect("get succeeds").expect("namespace exists");
        assert!(!ns.annotations().contains_key(ANN_IPS));
    }

    #[tokio::test]
    async fn non_integer_count_is_rewritten_to_default() {
        let ns_store: MockStore<Namespace> = MockStore::new();
        let pool_store: MockStore<Pool> = MockStore::new();
        let ip_store: MockStore<IP> = MockStore::new();

        let mut ns = namespace("ns-a");
        ns.annotations_mut().insert(ANN_NUMBER_OF_IP.to_string(), "not-a-number".to_string());
        ns_store.seed(None, "ns-a", ns);
        pool_store.seed(None, "default", pool("default", vec!["172.22.132.10"], true, vec![]));

        reconcile_namespace("ns-a", &ns_store, &pool_store, &ip_store, &cfg())
            .await
            .expect("reconcile succeeds");

        let ns = ns_store.get(None, "ns-a").await.expect("get succeeds").expect("namespace exists");
        assert_eq!(ns.annotations().get(ANN_NUMBER_OF_IP), Some(&"1".to_string()));
    }

    #[tokio::test]
    async fn ignored_namespace_is_skipped() {
        let ns_store: MockStore<Namespace> = MockStore::new();
        let pool_store: MockStore<Pool> = MockStore::new();
        let ip_store: MockStore<IP> = MockStore::new();

        ns_store.seed(None, "ns-a", namespace("ns-a"));
        pool_store.seed(None, "default", pool("default", vec!["172.22.132.10"], true, vec!["ns-a"]));

        reconcile_namespace("ns-a", &ns_store, &pool_store, &ip_store, &cfg())
            .await
            .expect("reconcile succeeds");

        let claims = ip_store.list(Some("ns-a")).await.expect("list succeeds");
        assert!(claims.is_empty());
    }

    #[tokio::test]
    async fn missing_pool_is_a_reconcile_error() {
        let ns_store: MockStore<Namespace> = MockStore::new();
        let pool_store: MockStore<Pool> = MockStore::new();
        let ip_store: MockStore<IP> = MockStore::new();

        ns_store.seed(None, "ns-a", namespace("ns-a"));

        let err = reconcile_namespace("ns-a", &ns_store, &pool_store, &ip_store, &cfg())
            .await
            .expect_err("missing pool must error");
        assert!(matches!(err, ControllerError::PoolNotFound(_)));
    }
}
