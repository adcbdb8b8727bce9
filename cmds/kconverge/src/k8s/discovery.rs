//! Kubernetes API resource discovery.
//!
//! Discovery answers two questions for a pass: which resource types can be
//! enumerated, and which plural serves a given group/version/kind.

use std::collections::HashMap;

use kube::{
	discovery::{verbs, ApiCapabilities, ApiResource, Scope},
	Client, Discovery,
};
use tracing::instrument;

use super::ResourceScope;

/// A resource type advertised by the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredResource {
	pub group: String,
	pub version: String,
	pub kind: String,
	/// Collection name used in API paths, e.g. `deployments`.
	pub plural: String,
	pub scope: ResourceScope,
	pub verbs: Vec<String>,
}

impl DiscoveredResource {
	pub fn supports(&self, verb: &str) -> bool {
		self.verbs.iter().any(|v| v == verb)
	}

	pub fn is_listable(&self) -> bool {
		self.supports(verbs::LIST)
	}

	fn from_kube(ar: ApiResource, caps: &ApiCapabilities) -> Self {
		Self {
			group: ar.group,
			version: ar.version,
			kind: ar.kind,
			plural: ar.plural,
			scope: match caps.scope {
				Scope::Namespaced => ResourceScope::Namespaced,
				Scope::Cluster => ResourceScope::ClusterWide,
			},
			verbs: caps.operations.clone(),
		}
	}
}

impl std::fmt::Display for DiscoveredResource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.group.is_empty() {
			write!(f, "{}/{}", self.version, self.plural)
		} else {
			write!(f, "{}/{}/{}", self.group, self.version, self.plural)
		}
	}
}

/// Lookup table from `(group, version, kind)` to the discovered type.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
	resources: HashMap<(String, String, String), DiscoveredResource>,
}

impl ResourceCatalog {
	pub fn new(resources: impl IntoIterator<Item = DiscoveredResource>) -> Self {
		Self {
			resources: resources
				.into_iter()
				.map(|r| ((r.group.clone(), r.version.clone(), r.kind.clone()), r))
				.collect(),
		}
	}

	pub fn lookup(&self, group: &str, version: &str, kind: &str) -> Option<&DiscoveredResource> {
		self.resources
			.get(&(group.to_string(), version.to_string(), kind.to_string()))
	}
}

/// Discover the server's preferred resource types, one version per group.
///
/// Uses the Aggregated Discovery API (K8s 1.26+, two API calls) and falls
/// back to per-group legacy discovery on older servers.
#[instrument(skip(client))]
pub async fn discover_preferred(client: &Client) -> Result<Vec<DiscoveredResource>, kube::Error> {
	let discovery = match Discovery::new(client.clone()).run_aggregated().await {
		Ok(discovery) => {
			tracing::debug!("using aggregated discovery");
			discovery
		}
		Err(e) => {
			tracing::debug!(error = %e, "aggregated discovery not available, using legacy discovery");
			Discovery::new(client.clone()).run().await?
		}
	};

	let mut resources = Vec::new();
	for group in discovery.groups() {
		for (ar, caps) in group.recommended_resources() {
			resources.push(DiscoveredResource::from_kube(ar, &caps));
		}
	}

	tracing::debug!(count = resources.len(), "discovered resource types");
	Ok(resources)
}
