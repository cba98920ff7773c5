//! Thin, typed facade over the Kubernetes API: get/list/create/update/delete
//! plus a watch-with-resync event stream, per kind.
//!
//! [`KubeStore`] backs reads with an in-memory reflector cache kept current
//! by [`watch_with_resync`] and sends writes straight to the API server.
//! [`mock::MockStore`] is an in-memory stand-in with the same trait, used so
//! reconcile logic can be unit-tested without a live API server.

pub mod error;
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use kube_runtime::reflector::{self, ObjectRef, Store};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

pub use error::StoreError;

/// The resync floor mandated by the design: even an idle watch channel
/// forces a full re-list at least this often, so a missed event is never
/// fatal to eventual convergence.
pub const MIN_RESYNC: Duration = Duration::from_secs(30);

/// A single watch notification: the kind of change and the object as
/// observed at that point. Periodic resyncs surface as `Applied` of an
/// unchanged object, which is harmless against an idempotent reconciler.
#[derive(Debug, Clone)]
pub enum ObjectEvent<K> {
    /// Object created, updated, or restated by a resync.
    Applied(Arc<K>),
    /// Object removed from the store.
    Deleted(Arc<K>),
}

/// Per-kind object store facade: typed CRUD plus a cached lister.
pub trait ObjectStore<K>: Send + Sync {
    /// Fetches a single object by name (and namespace, for namespaced
    /// kinds) from the local cache. Returns `Ok(None)` rather than
    /// [`StoreError::NotFound`] — callers decide whether absence is an
    /// error.
    fn get(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<K>, StoreError>> + Send;

    /// Lists every cached object, optionally restricted to one namespace.
    fn list(
        &self,
        namespace: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<K>, StoreError>> + Send;

    /// Creates `obj` against the store.
    fn create(&self, obj: &K) -> impl std::future::Future<Output = Result<K, StoreError>> + Send;

    /// Updates `obj`. Implementations must honor optimistic concurrency via
    /// `obj`'s `resourceVersion`, surfacing a stale write as
    /// [`StoreError::Conflict`].
    fn update(&self, obj: &K) -> impl std::future::Future<Output = Result<K, StoreError>> + Send;

    /// Deletes the named object, reporting absence as
    /// [`StoreError::NotFound`] rather than treating it as success; callers
    /// that want delete-if-present semantics handle that themselves.
    fn delete(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

/// Kubernetes-backed [`ObjectStore`]: reads hit an in-memory reflector
/// cache, writes go straight to the API server. Every write builds its own
/// `Api` scoped to the object's namespace (or cluster-wide for
/// cluster-scoped kinds) rather than reusing one fixed `Api`, since a
/// namespaced kind's create/update/delete is invalid against an
/// `Api::all`-style handle.
#[derive(Clone)]
pub struct KubeStore<K>
where
    K: Resource + Clone + 'static,
{
    client: Client,
    reader: Store<K>,
}

impl<K> std::fmt::Debug for KubeStore<K>
where
    K: Resource + Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl<K> KubeStore<K>
where
    K: Resource + Clone + Send + Sync + DeserializeOwned + Serialize + std::fmt::Debug + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    /// Wraps an already-running reflector's cache handle with a writer
    /// client. Use [`watch_with_resync`] to construct both together.
    #[must_use]
    pub fn new(client: Client, reader: Store<K>) -> Self {
        Self { client, reader }
    }

    /// Awaits the reflector's initial list, gating worker startup on a
    /// populated cache. `None` means the cache never reported ready inside
    /// `timeout`.
    pub async fn wait_until_synced(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.reader.wait_until_ready())
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Builds an `Api` scoped to `namespace`, or cluster-wide when `None`
    /// (the correct shape for both cluster-scoped kinds and namespace-less
    /// callers).
    fn scoped_api(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource + Clone + Send + Sync + DeserializeOwned + Serialize + std::fmt::Debug + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        let dt = K::DynamicType::default();
        let object_ref = match namespace {
            Some(ns) => ObjectRef::new_with(name, dt).within(ns),
            None => ObjectRef::new_with(name, dt),
        };
        Ok(self.reader.get(&object_ref).map(|arc| (*arc).clone()))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        Ok(self
            .reader
            .state()
            .iter()
            .filter(|obj| namespace.is_none_or(|ns| obj.namespace().as_deref() == Some(ns)))
            .map(|arc| (**arc).clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        self.scoped_api(obj.namespace().as_deref())
            .create(&PostParams::default(), obj)
            .await
            .map_err(StoreError::classify)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        self.scoped_api(obj.namespace().as_deref())
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(StoreError::classify)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        self.scoped_api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(StoreError::classify)?;
        Ok(())
    }
}

/// Starts a reflector-backed watch across every namespace of `K`, invoking
/// `on_event` for every watch notification, and additionally re-invoking
/// `on_event` for every cached object once per `resync` interval (clamped to
/// [`MIN_RESYNC`]) to provide the periodic full-resync the design requires
/// independently of whatever relist cadence the underlying watch stream
/// uses. The watch itself always lists/watches cluster-wide via
/// `Api::all`; [`KubeStore`]'s writes build their own namespace-scoped `Api`
/// per call, so this is independent of how individual writes are scoped.
///
/// Returns the store handle and the background task driving the watch.
/// Dropping the returned handle does not stop the watch; hold it to
/// propagate a cancellation token or to observe a crashed watch task.
pub fn watch_with_resync<K>(
    client: Client,
    resync: Duration,
    on_event: impl Fn(ObjectEvent<K>) + Send + Sync + 'static,
) -> (KubeStore<K>, tokio::task::JoinHandle<()>)
where
    K: Resource + Clone + Send + Sync + DeserializeOwned + Serialize + std::fmt::Debug + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let resync = resync.max(MIN_RESYNC);
    let api: Api<K> = Api::all(client.clone());
    let (reader, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()));

    let on_event = Arc::new(on_event);
    let watch_store = KubeStore::new(client, reader.clone());

    let watch_on_event = on_event.clone();
    let watch_task = async move {
        let mut stream = Box::pin(stream);
        loop {
            match stream.next().await {
                Some(Ok(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj))) => {
                    debug!("watch event for {}", obj.name_any());
                    watch_on_event(ObjectEvent::Applied(Arc::new(obj)));
                }
                Some(Ok(watcher::Event::Delete(obj))) => {
                    debug!("delete event for {}", obj.name_any());
                    watch_on_event(ObjectEvent::Deleted(Arc::new(obj)));
                }
                Some(Ok(watcher::Event::Init | watcher::Event::InitDone)) => {}
                Some(Err(err)) => warn!("watch stream error: {err}"),
                None => break,
            }
        }
    };

    let resync_task = async move {
        let mut ticker = tokio::time::interval(resync);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            for obj in reader.state() {
                on_event(ObjectEvent::Applied(obj));
            }
        }
    };

    let handle = tokio::spawn(async move {
        tokio::select! {
            () = watch_task => {}
            () = resync_task => {}
        }
    });

    (watch_store, handle)
}
