//! Common test utilities.

use std::{
	collections::{BTreeMap, HashSet},
	sync::Mutex,
};

use async_trait::async_trait;
use k8s::ResourceIdentity;
use kube::api::DynamicObject;
use thiserror::Error;

use crate::k8s::{
	cluster::{ClusterApi, ResourceTarget},
	discovery::DiscoveredResource,
	ResourceScope,
};

/// A call recorded by [`MemoryCluster`], failed or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
	Create(ResourceIdentity),
	Replace {
		identity: ResourceIdentity,
		resource_version: Option<String>,
	},
	Delete(ResourceIdentity),
}

impl Call {
	pub fn identity(&self) -> &ResourceIdentity {
		match self {
			Call::Create(id) | Call::Delete(id) => id,
			Call::Replace { identity, .. } => identity,
		}
	}
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct MemoryClusterError(String);

#[derive(Default)]
struct State {
	objects: BTreeMap<ResourceIdentity, DynamicObject>,
	calls: Vec<Call>,
	resource_version: u64,
}

impl State {
	fn store(&mut self, identity: ResourceIdentity, mut object: DynamicObject) {
		self.resource_version += 1;
		object.metadata.resource_version = Some(self.resource_version.to_string());
		self.objects.insert(identity, object);
	}
}

/// An in-memory cluster that records every write and can be told to fail.
#[derive(Default)]
pub struct MemoryCluster {
	types: Vec<DiscoveredResource>,
	state: Mutex<State>,
	failing_names: HashSet<String>,
	unlistable: HashSet<String>,
	broken_discovery: bool,
}

pub fn resource_type(api_version: &str, kind: &str, plural: &str, scope: ResourceScope) -> DiscoveredResource {
	let (group, version) = k8s::split_api_version(api_version);
	DiscoveredResource {
		group: group.to_string(),
		version: version.to_string(),
		kind: kind.to_string(),
		plural: plural.to_string(),
		scope,
		verbs: ["create", "delete", "get", "list", "update"]
			.iter()
			.map(|v| v.to_string())
			.collect(),
	}
}

pub fn dynamic_object(manifest: serde_json::Value) -> DynamicObject {
	serde_json::from_value(manifest).expect("test manifest should be a valid object")
}

pub fn config_map(namespace: &str, name: &str, data: serde_json::Value) -> serde_json::Value {
	serde_json::json!({
		"apiVersion": "v1",
		"kind": "ConfigMap",
		"metadata": {
			"name": name,
			"namespace": namespace
		},
		"data": data
	})
}

impl MemoryCluster {
	/// A cluster serving ConfigMap, Secret, Namespace and Deployment.
	pub fn new() -> Self {
		Self {
			types: vec![
				resource_type("v1", "ConfigMap", "configmaps", ResourceScope::Namespaced),
				resource_type("v1", "Secret", "secrets", ResourceScope::Namespaced),
				resource_type("v1", "Namespace", "namespaces", ResourceScope::ClusterWide),
				resource_type("apps/v1", "Deployment", "deployments", ResourceScope::Namespaced),
			],
			..Self::default()
		}
	}

	pub fn with_type(mut self, resource: DiscoveredResource) -> Self {
		self.types.push(resource);
		self
	}

	/// Seed an object; it receives a fresh resourceVersion.
	pub fn with_object(self, manifest: serde_json::Value) -> Self {
		let identity = ResourceIdentity::from_manifest(&manifest).expect("seeded object needs an identity");
		self.state
			.lock()
			.unwrap()
			.store(identity, dynamic_object(manifest));
		self
	}

	/// Fail every write addressed to `name`.
	pub fn failing_on(mut self, name: &str) -> Self {
		self.failing_names.insert(name.to_string());
		self
	}

	/// Fail listing the type with the given plural.
	pub fn unlistable(mut self, plural: &str) -> Self {
		self.unlistable.insert(plural.to_string());
		self
	}

	pub fn broken_discovery(mut self) -> Self {
		self.broken_discovery = true;
		self
	}

	pub fn calls(&self) -> Vec<Call> {
		self.state.lock().unwrap().calls.clone()
	}

	pub fn calls_for(&self, identity: &ResourceIdentity) -> Vec<Call> {
		self.calls()
			.into_iter()
			.filter(|c| c.identity() == identity)
			.collect()
	}

	pub fn clear_calls(&self) {
		self.state.lock().unwrap().calls.clear();
	}

	pub fn object(&self, identity: &ResourceIdentity) -> Option<DynamicObject> {
		self.state.lock().unwrap().objects.get(identity).cloned()
	}

	fn identity(target: &ResourceTarget, name: &str) -> ResourceIdentity {
		ResourceIdentity::new(
			&target.group,
			&target.version,
			&target.kind,
			target.namespace.clone().unwrap_or_default(),
			name,
		)
	}

	fn check_failing(&self, name: &str) -> Result<(), MemoryClusterError> {
		if self.failing_names.contains(name) {
			return Err(MemoryClusterError(format!("{} is rejected", name)));
		}
		Ok(())
	}
}

#[async_trait]
impl ClusterApi for MemoryCluster {
	type Error = MemoryClusterError;

	async fn discover(&self) -> Result<Vec<DiscoveredResource>, MemoryClusterError> {
		if self.broken_discovery {
			return Err(MemoryClusterError("discovery is forbidden".to_string()));
		}
		Ok(self.types.clone())
	}

	async fn list(&self, resource: &DiscoveredResource) -> Result<Vec<DynamicObject>, MemoryClusterError> {
		if self.unlistable.contains(&resource.plural) {
			return Err(MemoryClusterError(format!("cannot list {}", resource.plural)));
		}
		let state = self.state.lock().unwrap();
		Ok(state
			.objects
			.iter()
			.filter(|(id, _)| {
				id.group == resource.group && id.version == resource.version && id.kind == resource.kind
			})
			.map(|(_, obj)| {
				// List items come back without apiVersion/kind
				let mut obj = obj.clone();
				obj.types = None;
				obj
			})
			.collect())
	}

	async fn create(&self, target: &ResourceTarget, object: &DynamicObject) -> Result<(), MemoryClusterError> {
		let name = object.metadata.name.clone().unwrap_or_default();
		let identity = Self::identity(target, &name);
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::Create(identity.clone()));
		self.check_failing(&name)?;

		if state.objects.contains_key(&identity) {
			return Err(MemoryClusterError(format!("{} already exists", identity)));
		}
		state.store(identity, object.clone());
		Ok(())
	}

	async fn replace(
		&self,
		target: &ResourceTarget,
		name: &str,
		object: &DynamicObject,
	) -> Result<(), MemoryClusterError> {
		let identity = Self::identity(target, name);
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::Replace {
			identity: identity.clone(),
			resource_version: object.metadata.resource_version.clone(),
		});
		self.check_failing(name)?;

		let Some(existing) = state.objects.get(&identity) else {
			return Err(MemoryClusterError(format!("{} not found", identity)));
		};
		if existing.metadata.resource_version != object.metadata.resource_version {
			return Err(MemoryClusterError(format!(
				"conflict on {}: the object has been modified",
				identity
			)));
		}
		state.store(identity, object.clone());
		Ok(())
	}

	async fn delete(&self, target: &ResourceTarget, name: &str) -> Result<(), MemoryClusterError> {
		let identity = Self::identity(target, name);
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::Delete(identity.clone()));
		self.check_failing(name)?;

		state
			.objects
			.remove(&identity)
			.map(|_| ())
			.ok_or_else(|| MemoryClusterError(format!("{} not found", identity)))
	}
}
