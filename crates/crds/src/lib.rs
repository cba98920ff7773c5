//! IP allocation CRD definitions
//!
//! Kubernetes Custom Resource Definitions for the IP allocation controller.

pub mod ip;
pub mod pool;

pub use ip::*;
pub use pool::*;
