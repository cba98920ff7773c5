//! In-memory [`ObjectStore`] for reconcile unit tests.
//!
//! Mirrors the shape of a real typed client closely enough that reconcile
//! logic written against the `ObjectStore` trait runs unchanged against it,
//! without a live API server.

use std::collections::HashMap;
use std::sync::Mutex;

use kube::{Resource, ResourceExt};

use crate::{ObjectStore, StoreError};

fn key_of<K: Resource>(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

/// An in-memory `HashMap`-backed store keyed by `namespace/name` (or bare
/// `name` for cluster-scoped kinds).
pub struct MockStore<K> {
    objects: Mutex<HashMap<String, K>>,
}

impl<K> std::fmt::Debug for MockStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore").finish_non_exhaustive()
    }
}

impl<K> Default for MockStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Clone> MockStore<K> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with `obj` ahead of a test, as if it had already
    /// been created.
    pub fn seed(&self, namespace: Option<&str>, name: &str, obj: K)
    where
        K: Resource,
    {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key_of::<K>(namespace, name), obj);
    }
}

impl<K> ObjectStore<K> for MockStore<K>
where
    K: Resource + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key_of::<K>(namespace, name))
            .cloned())
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|obj| namespace.is_none_or(|ns| obj.namespace().as_deref() == Some(ns)))
            .cloned()
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of::<K>(obj.namespace().as_deref(), &obj.name_any());
        let mut objects = self
            .objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if objects.contains_key(&key) {
            return Err(StoreError::Conflict);
        }
        objects.insert(key, obj.clone());
        Ok(obj.clone())
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of::<K>(obj.namespace().as_deref(), &obj.name_any());
        let mut objects = self
            .objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !objects.contains_key(&key) {
            return Err(StoreError::NotFound);
        }
        objects.insert(key, obj.clone());
        Ok(obj.clone())
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        let key = key_of::<K>(namespace, name);
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&key)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Namespace;

    fn ns(name: &str) -> Namespace {
        let mut n = Namespace::default();
        n.metadata.name = Some(name.to_string());
        n
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store: MockStore<Namespace> = MockStore::new();
        store.create(&ns("a")).await.expect("first create succeeds");
        let fetched = store.get(None, "a").await.expect("get succeeds");
        assert_eq!(fetched.expect("object exists").name_any(), "a");
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let store: MockStore<Namespace> = MockStore::new();
        store.create(&ns("a")).await.expect("first create succeeds");
        let err = store.create(&ns("a")).await.expect_err("duplicate create must fail");
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store: MockStore<Namespace> = MockStore::new();
        let err = store.update(&ns("missing")).await.expect_err("update of absent object must fail");
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store: MockStore<Namespace> = MockStore::new();
        let err = store.delete(None, "missing").await.expect_err("delete of absent object must fail");
        assert!(matches!(err, StoreError::NotFound));
    }
}
