//! Converge a Kubernetes cluster on a directory of manifests.
//!
//! Each pass lists every live object the caller can see, loads every desired
//! object from disk, and creates, replaces or deletes until the two agree.

pub mod config;
pub mod driver;
pub mod k8s;
pub mod live;
pub mod manifest;
pub mod reconcile;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
