//! Live-state enumeration.
//!
//! Reads every object of every listable resource type into a map keyed by
//! identity. The read is a full snapshot, never a cache.

use std::collections::HashMap;

use k8s::ResourceIdentity;
use kube::api::DynamicObject;
use thiserror::Error;
use tracing::instrument;

use crate::k8s::{cluster::ClusterApi, discovery::ResourceCatalog};

/// A currently existing object.
#[derive(Debug, Clone)]
pub struct LiveResource {
	pub identity: ResourceIdentity,
	pub object: DynamicObject,
}

impl LiveResource {
	/// The server-assigned version token used for optimistic concurrency.
	pub fn resource_version(&self) -> Option<&str> {
		self.object.metadata.resource_version.as_deref()
	}
}

pub type LiveState = HashMap<ResourceIdentity, LiveResource>;

/// Result of one enumeration pass.
#[derive(Debug, Default)]
pub struct LiveSnapshot {
	pub resources: LiveState,
	/// Every type the server advertised, listable or not.
	pub catalog: ResourceCatalog,
	/// Types whose list call failed, e.g. `apps/v1/deployments`.
	pub skipped_types: Vec<String>,
}

#[derive(Debug, Error)]
pub enum EnumerateError {
	#[error("fetching the API discovery catalog: {0}")]
	Discovery(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Enumerate every object the caller may list, across all advertised types.
///
/// A failure to list one type is logged and the type is skipped. Only a
/// discovery failure aborts the enumeration.
#[instrument(skip_all)]
pub async fn enumerate_live_state<C: ClusterApi>(cluster: &C) -> Result<LiveSnapshot, EnumerateError> {
	let discovered = cluster
		.discover()
		.await
		.map_err(|e| EnumerateError::Discovery(Box::new(e)))?;

	let mut snapshot = LiveSnapshot {
		catalog: ResourceCatalog::new(discovered.iter().cloned()),
		..LiveSnapshot::default()
	};

	for resource in &discovered {
		if !resource.is_listable() {
			tracing::debug!(resource = %resource, "skipping type without list verb");
			continue;
		}

		let objects = match cluster.list(resource).await {
			Ok(objects) => objects,
			Err(e) => {
				tracing::warn!(resource = %resource, error = %e, "failed to list resource type, skipping");
				snapshot.skipped_types.push(resource.to_string());
				continue;
			}
		};

		for object in objects {
			let Some(name) = object.metadata.name.clone() else {
				tracing::debug!(resource = %resource, "skipping listed object without a name");
				continue;
			};
			let identity = ResourceIdentity::new(
				&resource.group,
				&resource.version,
				&resource.kind,
				object.metadata.namespace.clone().unwrap_or_default(),
				name,
			);
			snapshot
				.resources
				.insert(identity.clone(), LiveResource { identity, object });
		}
	}

	tracing::debug!(
		objects = snapshot.resources.len(),
		types = discovered.len(),
		skipped = snapshot.skipped_types.len(),
		"enumerated live state"
	);
	Ok(snapshot)
}
