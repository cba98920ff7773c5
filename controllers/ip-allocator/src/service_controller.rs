//! Service Controller (design §4.5): allocates (or adopts) a public IP
//! claim for a service's first declared external IP, and guards deletion
//! with a finalizer that accounts for shared addresses.

use std::net::IpAddr;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, info};

use crds::{IPSpec, IP};
use store::ObjectStore;

use crate::constants::{ANN_EXTERNAL_POOL, ANN_PUBLIC_IP, FINALIZER};
use crate::error::ControllerError;
use crate::reaping::delete_claim;

/// Static configuration the service controller needs: the pool to default
/// to when a service carries no pool annotation yet.
#[derive(Debug, Clone)]
pub struct ServiceControllerConfig {
    pub default_pool_name: String,
}

/// Reconciles the service named `key` (`namespace/name`).
pub async fn reconcile_service<SvcStore, IpStore>(
    key: &str,
    svc_store: &SvcStore,
    ip_store: &IpStore,
    cfg: &ServiceControllerConfig,
) -> Result<(), ControllerError>
where
    SvcStore: ObjectStore<Service>,
    IpStore: ObjectStore<IP>,
{
    let (namespace, name) = split_key(key);
    let Some(mut svc) = svc_store.get(Some(namespace), name).await? else {
        debug!("service {key} not found, dropping");
        return Ok(());
    };

    if svc.metadata.deletion_timestamp.is_some() {
        return cleanup_on_deletion(svc_store, ip_store, &svc).await;
    }

    if !svc.annotations().contains_key(ANN_EXTERNAL_POOL) {
        svc.annotations_mut()
            .insert(ANN_EXTERNAL_POOL.to_string(), cfg.default_pool_name.clone());
    }

    let Some(requested) = first_external_ip(&svc) else {
        return Ok(());
    };

    let already_allocated = svc
        .annotations()
        .get(ANN_PUBLIC_IP)
        .is_some_and(|addr| IpAddr::from_str(addr).is_ok());

    if !already_allocated {
        let address = allocate_or_adopt(ip_store, namespace, &requested, &svc).await?;
        svc.annotations_mut().insert(ANN_PUBLIC_IP.to_string(), address);
    }

    if !svc.finalizers().iter().any(|f| f == FINALIZER) {
        svc.finalizers_mut().push(FINALIZER.to_string());
    }

    svc_store.update(&svc).await?;
    Ok(())
}

fn split_key(key: &str) -> (&str, &str) {
    key.split_once('/').unwrap_or(("default", key))
}

fn first_external_ip(svc: &Service) -> Option<String> {
    svc.spec
        .as_ref()
        .and_then(|s| s.external_ips.as_ref())
        .and_then(|ips| ips.first())
        .cloned()
}

/// Looks up or creates the claim for `requested`, returning the resolved
/// address once the claim is `Active`, or creating the claim and returning
/// a transient error otherwise so the reconcile requeues (the claim's own
/// watch will trigger a fresh pass once the resolver fills in its status).
async fn allocate_or_adopt<IpStore>(
    ip_store: &IpStore,
    namespace: &str,
    requested: &str,
    svc: &Service,
) -> Result<String, ControllerError>
where
    IpStore: ObjectStore<IP>,
{
    let pool_name = svc
        .annotations()
        .get(ANN_EXTERNAL_POOL)
        .cloned()
        .unwrap_or_default();

    match ip_store.get(Some(namespace), requested).await? {
        Some(claim) => {
            let address = claim.status.as_ref().map(|s| s.address.as_str()).unwrap_or("");
            if IpAddr::from_str(address).is_ok() {
                Ok(address.to_string())
            } else {
                Err(ControllerError::AllocatedPendingResolve)
            }
        }
        None => {
            let mut claim = IP::new(requested, IPSpec { pool_name });
            claim.metadata.namespace = Some(namespace.to_string());
            claim.metadata.owner_references = svc.controller_owner_ref(&()).map(|o| vec![o]);
            ip_store.create(&claim).await?;
            Err(ControllerError::AllocatedPendingResolve)
        }
    }
}

/// Cleanup on deletion (design §4.5.1): if the address is shared with
/// another service, leave the claim alone and only strip the finalizer.
/// Otherwise delete the claim, then strip the finalizer as the final
/// write.
async fn cleanup_on_deletion<SvcStore, IpStore>(
    svc_store: &SvcStore,
    ip_store: &IpStore,
    svc: &Service,
) -> Result<(), ControllerError>
where
    SvcStore: ObjectStore<Service>,
    IpStore: ObjectStore<IP>,
{
    let namespace = svc.namespace().unwrap_or_default();
    let address = svc.annotations().get(ANN_PUBLIC_IP).cloned().unwrap_or_default();

    if IpAddr::from_str(&address).is_ok() {
        let siblings = svc_store.list(Some(&namespace)).await?;
        let shared = siblings
            .iter()
            .filter(|other| other.annotations().get(ANN_PUBLIC_IP) == Some(&address))
            .count()
            > 1;

        if !shared {
            if let Some(requested) = first_external_ip(svc) {
                delete_claim(ip_store, &namespace, &requested).await?;
            }
        } else {
            info!("address {address} shared by another service in {namespace}, claim preserved");
        }
    }

    let mut svc = svc.clone();
    svc.finalizers_mut().retain(|f| f != FINALIZER);
    svc_store.update(&svc).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{IPPhase, IPStatus};
    use k8s_openapi::api::core::v1::ServiceSpec;
    use store::mock::MockStore;

    fn svc(name: &str, ns: &str, external_ips: Vec<&str>) -> Service {
        let mut s = Service::default();
        s.metadata.name = Some(name.to_string());
        s.metadata.namespace = Some(ns.to_string());
        s.spec = Some(ServiceSpec {
            external_ips: Some(external_ips.into_iter().map(String::from).collect()),
            ..Default::default()
        });
        s
    }

    fn cfg() -> ServiceControllerConfig {
        ServiceControllerConfig { default_pool_name: "public".to_string() }
    }

    #[tokio::test]
    async fn allocation_adopts_resolved_claim() {
        let svc_store: MockStore<Service> = MockStore::new();
        let ip_store: MockStore<IP> = MockStore::new();

        svc_store.seed(Some("svc-ns"), "web", svc("web", "svc-ns", vec!["172.11.22.33"]));

        let mut claim = IP::new("172.11.22.33", IPSpec { pool_name: "public".to_string() });
        claim.metadata.namespace = Some("svc-ns".to_string());
        claim.status = Some(IPStatus {
            phase: IPPhase::Active,
            address: "140.11.22.33".to_string(),
            last_update_time: None,
        });
        ip_store.seed(Some("svc-ns"), "172.11.22.33", claim);

        reconcile_service("svc-ns/web", &svc_store, &ip_store, &cfg())
            .await
            .expect("reconcile succeeds");

        let svc = svc_store.get(Some("svc-ns"), "web").await.expect("get succeeds").expect("service exists");
        assert_eq!(svc.annotations().get(ANN_PUBLIC_IP), Some(&"140.11.22.33".to_string()));
        assert!(svc.finalizers().iter().any(|f| f == FINALIZER));
    }

    #[tokio::test]
    async fn allocation_creates_claim_and_requeues_when_absent() {
        let svc_store: MockStore<Service> = MockStore::new();
        let ip_store: MockStore<IP> = MockStore::new();
        svc_store.seed(Some("svc-ns"), "web", svc("web", "svc-ns", vec!["172.11.22.33"]));

        let err = reconcile_service("svc-ns/web", &svc_store, &ip_store, &cfg())
            .await
            .expect_err("must request a requeue while unresolved");
        assert!(matches!(err, ControllerError::AllocatedPendingResolve));

        let claim = ip_store.get(Some("svc-ns"), "172.11.22.33").await.expect("get succeeds");
        assert!(claim.is_some());
    }

    #[tokio::test]
    async fn shared_address_deletion_preserves_claim() {
        let svc_store: MockStore<Service> = MockStore::new();
        let ip_store: MockStore<IP> = MockStore::new();

        let mut a = svc("a", "svc-ns", vec!["172.11.22.33"]);
        a.annotations_mut().insert(ANN_PUBLIC_IP.to_string(), "140.11.22.33".to_string());
        a.finalizers_mut().push(FINALIZER.to_string());
        a.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
            chrono::Utc::now(),
        ));

        let mut b = svc("b", "svc-ns", vec!["172.11.22.34"]);
        b.annotations_mut().insert(ANN_PUBLIC_IP.to_string(), "140.11.22.33".to_string());

        svc_store.seed(Some("svc-ns"), "a", a);
        svc_store.seed(Some("svc-ns"), "b", b);

        let mut claim = IP::new("172.11.22.33", IPSpec { pool_name: "public".to_string() });
        claim.metadata.namespace = Some("svc-ns".to_string());
        ip_store.seed(Some("svc-ns"), "172.11.22.33", claim);

        reconcile_service("svc-ns/a", &svc_store, &ip_store, &cfg())
            .await
            .expect("reconcile succeeds");

        let claim = ip_store.get(Some("svc-ns"), "172.11.22.33").await.expect("get succeeds");
        assert!(claim.is_some(), "shared claim must survive deletion of one sibling");

        let a = svc_store.get(Some("svc-ns"), "a").await.expect("get succeeds").expect("service exists");
        assert!(!a.finalizers().iter().any(|f| f == FINALIZER));
    }
}
