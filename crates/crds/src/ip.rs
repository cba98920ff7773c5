//! IP CRD
//!
//! A namespaced claim against a `Pool`. The resolver (external) observes
//! claims and fills in `status.address`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "inwinstack.com",
    version = "v1",
    kind = "IP",
    plural = "ips",
    namespaced,
    status = "IPStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct IPSpec {
    /// Which pool to draw from.
    pub pool_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct IPStatus {
    /// Current phase of the claim.
    #[serde(default)]
    pub phase: IPPhase,

    /// Textual IPv4/IPv6 literal, populated by the resolver once `phase = Active`.
    #[serde(default)]
    pub address: String,

    /// Monotonic timestamp written by the resolver; used as a stable
    /// tiebreaker for age ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum IPPhase {
    #[default]
    Pending,
    Active,
    Failed,
}
