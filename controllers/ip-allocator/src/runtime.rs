//! Operator Runtime: wires the object stores, work queues, and worker pools
//! for the namespace and service controllers, and owns the edge-triggered
//! exceptions that only make sense at the watch layer (design §4.4, §4.5,
//! §9): namespace pool-swap stamping and the service `external-pool`
//! write-once guard. Both need the *previous* observed value, which a
//! level-triggered reconcile never sees — so the watch event handlers keep
//! small trackers of their own.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::{Api, Client, ResourceExt};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crds::{Pool, IP};
use store::{watch_with_resync, ObjectEvent, ObjectStore};
use workqueue::backoff::ExponentialBackoff;
use workqueue::WorkQueue;

use crate::constants::{ANN_EXTERNAL_POOL, ANN_POOL_NAME};
use crate::error::ControllerError;
use crate::namespace_controller::{reconcile_namespace, NamespaceControllerConfig};
use crate::service_controller::{reconcile_service, ServiceControllerConfig};

const SYNC_TIMEOUT: Duration = Duration::from_secs(60);
const RESYNC_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IpEventKey {
    owner_kind: String,
    owner_name: String,
    namespace: String,
}

/// Runs the operator until a termination signal arrives, then drains and
/// exits.
pub struct Runtime {
    watch_tasks: Vec<JoinHandle<()>>,
    worker_tasks: Vec<JoinHandle<()>>,
    ns_queue: WorkQueue<String>,
    svc_queue: WorkQueue<String>,
}

impl Runtime {
    /// Builds every store, watch, queue, and worker pool, then returns a
    /// handle ready for [`Self::run`]. Blocks until every cache's initial
    /// list has landed.
    pub async fn start(
        client: Client,
        threads: usize,
        ns_cfg: NamespaceControllerConfig,
        svc_cfg: ServiceControllerConfig,
    ) -> Result<Self, ControllerError> {
        let ns_queue: WorkQueue<String> = WorkQueue::new(ExponentialBackoff::default());
        let svc_queue: WorkQueue<String> = WorkQueue::new(ExponentialBackoff::default());
        let ip_queue: WorkQueue<IpEventKey> = WorkQueue::new(ExponentialBackoff::default());

        let pool_swap_tracker = std::sync::Arc::new(PreviousValueTracker::new());
        let external_pool_tracker = std::sync::Arc::new(PreviousValueTracker::new());

        let enqueue_ns = ns_queue.clone();
        let ns_client = client.clone();
        let (ns_store, ns_watch) = watch_with_resync::<Namespace>(client.clone(), RESYNC_PERIOD, move |event| {
            let ObjectEvent::Applied(ns) = event else { return };
            let name = ns.name_any();
            let current_pool = ns.annotations().get(ANN_POOL_NAME).cloned();
            let tracker = pool_swap_tracker.clone();
            let ns_client = ns_client.clone();
            let enqueue_ns = enqueue_ns.clone();
            tokio::spawn(async move {
                if let Some(current) = current_pool {
                    if let Some(previous) = tracker.swap(&name, &current) {
                        if previous != current {
                            warn!("namespace {name} pool changed {previous} -> {current}, stamping latest-pool");
                            stamp_latest_pool(ns_client, name.clone(), previous).await;
                        }
                    }
                }
                enqueue_ns.add(name).await;
            });
        });

        let enqueue_svc = svc_queue.clone();
        let svc_client = client.clone();
        let (svc_store, svc_watch) = watch_with_resync::<Service>(client.clone(), RESYNC_PERIOD, move |event| {
            let ObjectEvent::Applied(svc) = event else { return };
            let key = format!("{}/{}", svc.namespace().unwrap_or_default(), svc.name_any());
            let current_pool = svc.annotations().get(ANN_EXTERNAL_POOL).cloned();
            let tracker = external_pool_tracker.clone();
            let svc_client = svc_client.clone();
            let enqueue_svc = enqueue_svc.clone();
            tokio::spawn(async move {
                if let Some(current) = current_pool {
                    if let Some(previous) = tracker.swap(&key, &current) {
                        if previous != current {
                            warn!("service {key} external-pool changed {previous} -> {current}, reverting (write-once)");
                            revert_external_pool(svc_client, key.clone(), previous).await;
                        }
                    }
                }
                enqueue_svc.add(key).await;
            });
        });

        let (pool_store, pool_watch) = watch_with_resync::<Pool>(client.clone(), RESYNC_PERIOD, |_| {});

        let enqueue_ip = ip_queue.clone();
        let (ip_store, ip_watch) = watch_with_resync::<IP>(client.clone(), RESYNC_PERIOD, move |event| {
            let claim = match event {
                ObjectEvent::Applied(claim) | ObjectEvent::Deleted(claim) => claim,
            };
            if let Some(owner) = claim.metadata.owner_references.as_ref().and_then(|o| o.first()) {
                let key = IpEventKey {
                    owner_kind: owner.kind.clone(),
                    owner_name: owner.name.clone(),
                    namespace: claim.namespace().unwrap_or_default(),
                };
                let enqueue_ip = enqueue_ip.clone();
                tokio::spawn(async move {
                    enqueue_ip.add(key).await;
                });
            }
        });

        let synced = ns_store.wait_until_synced(SYNC_TIMEOUT).await
            && svc_store.wait_until_synced(SYNC_TIMEOUT).await
            && pool_store.wait_until_synced(SYNC_TIMEOUT).await
            && ip_store.wait_until_synced(SYNC_TIMEOUT).await;
        if !synced {
            return Err(ControllerError::InvalidConfig("cache failed to sync within timeout".into()));
        }

        let mut worker_tasks = Vec::with_capacity(threads * 2 + 1);
        for _ in 0..threads {
            let queue = ns_queue.clone();
            let ns_store = ns_store.clone();
            let pool_store = pool_store.clone();
            let ip_store = ip_store.clone();
            let cfg = ns_cfg.clone();
            worker_tasks.push(tokio::spawn(async move {
                namespace_worker(queue, ns_store, pool_store, ip_store, cfg).await;
            }));
        }
        for _ in 0..threads {
            let queue = svc_queue.clone();
            let svc_store = svc_store.clone();
            let ip_store = ip_store.clone();
            let cfg = svc_cfg.clone();
            worker_tasks.push(tokio::spawn(async move {
                service_worker(queue, svc_store, ip_store, cfg).await;
            }));
        }

        // The claim watch only drives re-enqueues of the owning namespace or
        // service key; it shares their queues rather than spawning its own
        // reconcile loop.
        let ns_queue_for_claims = ns_queue.clone();
        let svc_queue_for_claims = svc_queue.clone();
        worker_tasks.push(tokio::spawn(async move {
            claim_relay_worker(ip_queue, ns_queue_for_claims, svc_queue_for_claims).await;
        }));

        Ok(Self {
            watch_tasks: vec![ns_watch, svc_watch, pool_watch, ip_watch],
            worker_tasks,
            ns_queue,
            svc_queue,
        })
    }

    /// Blocks until SIGINT/SIGTERM, then shuts down every queue and waits
    /// for in-flight work to drain before returning.
    pub async fn run(self) -> Result<(), ControllerError> {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining work queues");

        self.ns_queue.shut_down().await;
        self.svc_queue.shut_down().await;

        for task in self.watch_tasks {
            task.abort();
        }
        for task in self.worker_tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

async fn namespace_worker<NsStore, PoolStore, IpStore>(
    queue: WorkQueue<String>,
    ns_store: NsStore,
    pool_store: PoolStore,
    ip_store: IpStore,
    cfg: NamespaceControllerConfig,
) where
    NsStore: ObjectStore<Namespace>,
    PoolStore: ObjectStore<Pool>,
    IpStore: ObjectStore<IP>,
{
    while let Some(key) = queue.get().await {
        match reconcile_namespace(&key, &ns_store, &pool_store, &ip_store, &cfg).await {
            Ok(()) => queue.forget(&key).await,
            Err(err) if err.is_not_found() => queue.forget(&key).await,
            Err(err) => {
                error!("namespace reconcile {key} failed: {err}");
                queue.add_rate_limited(key.clone()).await;
            }
        }
        queue.done(&key).await;
    }
}

async fn service_worker<SvcStore, IpStore>(
    queue: WorkQueue<String>,
    svc_store: SvcStore,
    ip_store: IpStore,
    cfg: ServiceControllerConfig,
) where
    SvcStore: ObjectStore<Service>,
    IpStore: ObjectStore<IP>,
{
    while let Some(key) = queue.get().await {
        match reconcile_service(&key, &svc_store, &ip_store, &cfg).await {
            Ok(()) => queue.forget(&key).await,
            Err(err) if err.is_not_found() => queue.forget(&key).await,
            Err(ControllerError::AllocatedPendingResolve) => {
                queue.add_rate_limited(key.clone()).await;
            }
            Err(err) => {
                error!("service reconcile {key} failed: {err}");
                queue.add_rate_limited(key.clone()).await;
            }
        }
        queue.done(&key).await;
    }
}

/// Translates claim-watch events into a re-enqueue of the owning namespace
/// or service, keyed by the claim's owner reference.
async fn claim_relay_worker(
    ip_queue: WorkQueue<IpEventKey>,
    ns_queue: WorkQueue<String>,
    svc_queue: WorkQueue<String>,
) {
    while let Some(key) = ip_queue.get().await {
        match key.owner_kind.as_str() {
            "Namespace" => ns_queue.add(key.owner_name.clone()).await,
            "Service" => svc_queue.add(format!("{}/{}", key.namespace, key.owner_name)).await,
            other => warn!("claim owned by unrecognized kind {other}, ignoring"),
        }
        ip_queue.done(&key).await;
    }
}

/// Tracks the last-observed value of a single annotation per key, so watch
/// handlers can detect an edge without a diff primitive from the watch
/// stream itself.
struct PreviousValueTracker {
    values: Mutex<HashMap<String, String>>,
}

impl PreviousValueTracker {
    fn new() -> Self {
        Self { values: Mutex::new(HashMap::new()) }
    }

    /// Records `current` for `key`, returning whatever was recorded before.
    fn swap(&self, key: &str, current: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), current.to_string())
    }
}

async fn stamp_latest_pool(client: Client, name: String, previous_pool: String) {
    let api: Api<Namespace> = Api::all(client);
    let Ok(mut ns) = api.get(&name).await else { return };
    ns.annotations_mut()
        .insert(crate::constants::ANN_LATEST_POOL.to_string(), previous_pool);
    if let Err(err) = api.replace(&name, &kube::api::PostParams::default(), &ns).await {
        warn!("failed to stamp latest-pool on {name}: {err}");
    }
}

async fn revert_external_pool(client: Client, key: String, original_pool: String) {
    let Some((namespace, name)) = key.split_once('/') else { return };
    let api: Api<Service> = Api::namespaced(client, namespace);
    let Ok(mut svc) = api.get(name).await else { return };
    svc.annotations_mut()
        .insert(ANN_EXTERNAL_POOL.to_string(), original_pool);
    if let Err(err) = api.replace(name, &kube::api::PostParams::default(), &svc).await {
        warn!("failed to revert external-pool on {key}: {err}");
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
