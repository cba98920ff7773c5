//! Controller-specific error types.

use thiserror::Error;

/// Errors a reconcile or bootstrap step can raise.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Object store failure (classified not-found/conflict/transport).
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    /// The pool referenced by a namespace or service does not exist.
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    /// A claim's `status.address` does not parse as an IP literal.
    #[error("unparseable address on claim {0}: {1}")]
    UnparseableAddress(String, String),

    /// Missing or contradictory CLI configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A public IP claim was just created; the resolver hasn't filled in
    /// its status yet. Not a failure — the caller requeues with backoff and
    /// the claim's own watch will trigger a fresh reconcile once resolved.
    #[error("allocated, not yet resolved")]
    AllocatedPendingResolve,

    /// Pool bootstrap exhausted its retry ceiling.
    #[error("bootstrap failed after {0} attempts: {1}")]
    BootstrapFailed(u32, Box<ControllerError>),
}

impl ControllerError {
    /// Object-not-found is the one outcome callers drop rather than
    /// requeue; everything else — including this enum's own variants — is
    /// retried with backoff.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(store::StoreError::NotFound))
    }
}
