//! Pool CRD
//!
//! Declares a named collection of address ranges plus allocation policy.
//! Pools are cluster-scoped: there is exactly one `Pool` object per name
//! across the whole cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "inwinstack.com",
    version = "v1",
    kind = "Pool",
    plural = "pools"
)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    /// Ordered CIDR or range literals this pool draws from.
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Namespace names the namespace controller skips entirely.
    #[serde(default)]
    pub ignore_namespaces: Vec<String>,

    /// When true, namespace-driven allocation is disabled for this pool.
    ///
    /// Only consulted by a legacy IP-sync controller outside this crate's
    /// scope; the namespace controller here never reads it.
    #[serde(default)]
    pub ignore_namespace_annotation: bool,

    /// When false, the namespace controller performs no claim management
    /// against this pool.
    #[serde(default = "default_true")]
    pub assign_to_namespace: bool,

    /// Resolver hint: avoid historically buggy addresses. Set once at bootstrap.
    #[serde(default)]
    pub avoid_buggy_ips: bool,

    /// Resolver hint: avoid gateway addresses. Set once at bootstrap.
    #[serde(default)]
    pub avoid_gateway_ips: bool,
}

fn default_true() -> bool {
    true
}
