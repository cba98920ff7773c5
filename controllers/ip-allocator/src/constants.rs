//! Wire-contract constants: annotation keys and the finalizer token.

/// Finalizer added to services once a public IP claim has been allocated.
pub const FINALIZER: &str = "kubernetes";

/// Default `allocate-ip-number` when the annotation is absent or malformed.
pub const DEFAULT_NUMBER_OF_IP: u32 = 1;

/// `inwinstack.com/allocate-ip-number`: desired count of private claims.
pub const ANN_NUMBER_OF_IP: &str = "inwinstack.com/allocate-ip-number";
/// `inwinstack.com/allocate-pool-name`: the namespace's private pool.
pub const ANN_POOL_NAME: &str = "inwinstack.com/allocate-pool-name";
/// `inwinstack.com/latest-pool`: transient pool-swap marker.
pub const ANN_LATEST_POOL: &str = "inwinstack.com/latest-pool";
/// `inwinstack.com/allocated-ips`: controller-written active address list.
pub const ANN_IPS: &str = "inwinstack.com/allocated-ips";
/// `inwinstack.com/allocated-latest-ip`: last element of `ANN_IPS`.
pub const ANN_LATEST_IP: &str = "inwinstack.com/allocated-latest-ip";
/// `inwinstack.com/external-pool`: the service's public pool (write-once).
pub const ANN_EXTERNAL_POOL: &str = "inwinstack.com/external-pool";
/// `inwinstack.com/allocated-public-ip`: controller-written service address.
pub const ANN_PUBLIC_IP: &str = "inwinstack.com/allocated-public-ip";
/// `inwinstack.com/dirty`: marks a claim scheduled for deletion by its
/// parent controller. Defined for forward compatibility; no reconcile path
/// in this crate currently sets it (see `reaping::mark_dirty`).
pub const ANN_DIRTY: &str = "inwinstack.com/dirty";
