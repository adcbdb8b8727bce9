//! The cluster capability consumed by the reconciliation core.

use async_trait::async_trait;
use k8s::ResourceIdentity;
use kube::{
	api::{Api, DeleteParams, DynamicObject, ListParams, PostParams},
	core::GroupVersionKind,
	discovery::ApiResource,
	Client,
};
use thiserror::Error;
use tracing::instrument;

use super::{
	client::ClusterConnection,
	discovery::{discover_preferred, DiscoveredResource},
};

/// Where a create, replace or delete call is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTarget {
	pub group: String,
	pub version: String,
	pub kind: String,
	pub plural: String,
	/// `None` addresses the cluster-scoped endpoint.
	pub namespace: Option<String>,
}

impl ResourceTarget {
	/// Address the collection holding `identity`, using `plural` as the resource name.
	pub fn for_identity(identity: &ResourceIdentity, plural: impl Into<String>) -> Self {
		Self {
			group: identity.group.clone(),
			version: identity.version.clone(),
			kind: identity.kind.clone(),
			plural: plural.into(),
			namespace: identity
				.is_namespaced()
				.then(|| identity.namespace.clone()),
		}
	}
}

/// Discovery, listing and per-object writes against a cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
	type Error: std::error::Error + Send + Sync + 'static;

	/// Preferred resource types, one group/version per type.
	async fn discover(&self) -> Result<Vec<DiscoveredResource>, Self::Error>;

	/// Every object of a type, across all namespaces for namespaced types.
	async fn list(&self, resource: &DiscoveredResource) -> Result<Vec<DynamicObject>, Self::Error>;

	async fn create(&self, target: &ResourceTarget, object: &DynamicObject) -> Result<(), Self::Error>;

	/// Full replacement; `object` must carry the current `resourceVersion`.
	async fn replace(
		&self,
		target: &ResourceTarget,
		name: &str,
		object: &DynamicObject,
	) -> Result<(), Self::Error>;

	async fn delete(&self, target: &ResourceTarget, name: &str) -> Result<(), Self::Error>;
}

/// Errors returned by [`KubeCluster`].
#[derive(Debug, Error)]
pub enum ClusterError {
	#[error("API discovery failed: {0}")]
	Discovery(#[source] kube::Error),

	#[error(transparent)]
	Request(#[from] kube::Error),
}

/// [`ClusterApi`] over a kube-rs client, using dynamic objects throughout.
#[derive(Clone)]
pub struct KubeCluster {
	client: Client,
}

impl KubeCluster {
	pub fn new(client: Client) -> Self {
		Self { client }
	}

	fn api(&self, target: &ResourceTarget) -> Api<DynamicObject> {
		let gvk = GroupVersionKind::gvk(&target.group, &target.version, &target.kind);
		let ar = ApiResource::from_gvk_with_plural(&gvk, &target.plural);
		match &target.namespace {
			Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
			None => Api::all_with(self.client.clone(), &ar),
		}
	}
}

impl From<&ClusterConnection> for KubeCluster {
	fn from(connection: &ClusterConnection) -> Self {
		Self::new(connection.client().clone())
	}
}

#[async_trait]
impl ClusterApi for KubeCluster {
	type Error = ClusterError;

	async fn discover(&self) -> Result<Vec<DiscoveredResource>, ClusterError> {
		discover_preferred(&self.client)
			.await
			.map_err(ClusterError::Discovery)
	}

	#[instrument(skip_all, fields(resource = %resource))]
	async fn list(&self, resource: &DiscoveredResource) -> Result<Vec<DynamicObject>, ClusterError> {
		// Namespaced types are listed through the all-namespaces endpoint
		let target = ResourceTarget {
			group: resource.group.clone(),
			version: resource.version.clone(),
			kind: resource.kind.clone(),
			plural: resource.plural.clone(),
			namespace: None,
		};
		let list = self.api(&target).list(&ListParams::default()).await?;
		Ok(list.items)
	}

	async fn create(&self, target: &ResourceTarget, object: &DynamicObject) -> Result<(), ClusterError> {
		self.api(target)
			.create(&PostParams::default(), object)
			.await?;
		Ok(())
	}

	async fn replace(
		&self,
		target: &ResourceTarget,
		name: &str,
		object: &DynamicObject,
	) -> Result<(), ClusterError> {
		self.api(target)
			.replace(name, &PostParams::default(), object)
			.await?;
		Ok(())
	}

	async fn delete(&self, target: &ResourceTarget, name: &str) -> Result<(), ClusterError> {
		self.api(target)
			.delete(name, &DeleteParams::default())
			.await?;
		Ok(())
	}
}
