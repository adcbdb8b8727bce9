//! Kubernetes cluster access.
//!
//! The reconciliation core only talks to the cluster through [`cluster::ClusterApi`];
//! [`cluster::KubeCluster`] implements it natively with kube-rs.

pub mod client;
pub mod cluster;
pub mod discovery;

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}
