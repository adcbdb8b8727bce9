//! Mock Kubernetes API discovery types.

use std::collections::BTreeMap;

/// Discovery mode for the mock server.
#[derive(Debug, Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
	/// Every discovery endpoint answers 403, so no catalog can be built.
	Broken,
}

const ALL_VERBS: &[&str] = &[
	"create", "delete", "get", "list", "patch", "update", "watch",
];

/// Pre-configured discovery responses.
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	/// Keyed by group/version, e.g. `apps/v1`.
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: BTreeMap::from([
				(
					"apps/v1".to_string(),
					vec![
						MockApiResource::namespaced("deployments", "Deployment"),
						MockApiResource::namespaced("statefulsets", "StatefulSet"),
					],
				),
				(
					"example.com/v1".to_string(),
					vec![MockApiResource::namespaced("widgets", "Widget")],
				),
			]),
		}
	}
}

impl MockDiscovery {
	/// Add a resource to the given group/version (`v1` for the core group).
	pub fn with_resource(mut self, api_version: &str, resource: MockApiResource) -> Self {
		if api_version == "v1" {
			self.core_resources.push(resource);
		} else {
			self.group_resources
				.entry(api_version.to_string())
				.or_default()
				.push(resource);
		}
		self
	}

	/// Find the resource serving `kind` in `api_version`.
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		let resources = if api_version == "v1" {
			&self.core_resources
		} else {
			self.group_resources.get(api_version)?
		};
		resources.iter().find(|r| r.kind == kind)
	}
}

/// A mock API resource definition.
#[derive(Debug, Clone)]
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: true,
			verbs: ALL_VERBS.iter().map(|v| v.to_string()).collect(),
		}
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self {
			namespaced: false,
			..Self::namespaced(name, kind)
		}
	}

	/// Replace the advertised verbs.
	pub fn with_verbs(mut self, verbs: &[&str]) -> Self {
		self.verbs = verbs.iter().map(|v| v.to_string()).collect();
		self
	}
}
