//! Error classification for the object store adapter.

use thiserror::Error;

/// Failure modes surfaced by [`crate::ObjectStore`] operations.
///
/// `NotFound` and `Conflict` are first-class results callers are expected
/// to branch on; everything else is a `Transport` error and should be
/// treated as retryable.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("object not found")]
    NotFound,

    /// An update was rejected because the object was modified concurrently
    /// (stale `resourceVersion`). Callers should re-fetch and retry.
    #[error("optimistic concurrency conflict")]
    Conflict,

    /// Any other API-server or transport failure. Retryable.
    #[error("store transport error: {0}")]
    Transport(#[source] kube::Error),
}

impl StoreError {
    /// Classifies a raw `kube::Error` per the failure model in the design:
    /// 404 becomes [`StoreError::NotFound`], 409 becomes
    /// [`StoreError::Conflict`], everything else is passed through as
    /// [`StoreError::Transport`].
    #[must_use]
    pub fn classify(err: kube::Error) -> Self {
        if let kube::Error::Api(ref api_err) = err {
            match api_err.code {
                404 => return Self::NotFound,
                409 => return Self::Conflict,
                _ => {}
            }
        }
        Self::Transport(err)
    }

    /// True for errors a caller should requeue-with-backoff rather than
    /// treat as a terminal outcome.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}
