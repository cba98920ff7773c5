//! Claim reaping policy (design §4.6): direct deletion vs. dirty-marking.

use crds::IP;
use store::{ObjectStore, StoreError};

use crate::constants::ANN_DIRTY;
use crate::error::ControllerError;

/// Deletes the named claim directly, tolerating `NotFound`. Used by every
/// reconcile path in this crate: namespace surplus trim, pool-swap
/// cleanup, and service cleanup-on-deletion.
pub async fn delete_claim<S>(store: &S, namespace: &str, name: &str) -> Result<(), ControllerError>
where
    S: ObjectStore<IP>,
{
    match store.delete(Some(namespace), name).await {
        Ok(()) => Ok(()),
        Err(StoreError::NotFound) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Marks `claim` dirty so an observing controller performs the final
/// delete once it has reacted. Defined as an extension point per the
/// design notes; no reconcile path in this crate currently calls it.
#[allow(dead_code, reason = "extension point, not yet exercised by any controller")]
pub async fn mark_dirty<S>(store: &S, claim: &mut IP) -> Result<(), ControllerError>
where
    S: ObjectStore<IP>,
{
    claim
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANN_DIRTY.to_string(), "true".to_string());
    store.update(claim).await?;
    Ok(())
}
