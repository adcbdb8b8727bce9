//! Identity-keyed diff and apply.
//!
//! Every desired object is created or fully replaced, and every live object
//! without a desired counterpart is deleted. A failed call is logged and the
//! remaining identities are still processed.
//!
//! A manifest whose namespace does not fit the discovered scope of its kind
//! is rejected without any write, and live objects of the same kind and name
//! are kept out of the prune.

use std::{collections::HashSet, fmt};

use k8s::{plural_from_kind, ResourceIdentity};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
	k8s::{
		cluster::{ClusterApi, ResourceTarget},
		ResourceScope,
	},
	live::{LiveResource, LiveSnapshot},
	manifest::{DesiredState, ManifestResource},
};

/// How a desired object that already exists is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateMode {
	/// Replace on every pass.
	#[default]
	Always,
	/// Replace only when some desired field differs from the live object.
	SkipUnchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
	pub update_mode: UpdateMode,
	/// Delete live objects that have no manifest.
	pub prune: bool,
}

impl Default for ReconcileOptions {
	fn default() -> Self {
		Self {
			update_mode: UpdateMode::default(),
			prune: true,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	Create,
	Update,
	Delete,
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Action::Create => "create",
			Action::Update => "update",
			Action::Delete => "delete",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Applied,
	/// Update skipped because the live object already matches.
	Unchanged,
	Failed(String),
	/// Not sent to the cluster because the manifest itself is invalid.
	Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
	pub identity: ResourceIdentity,
	pub action: Action,
	pub outcome: Outcome,
}

/// Per-identity outcomes of a reconcile, in the order they were attempted.
#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
	pub operations: Vec<Operation>,
}

impl ReconcileReport {
	fn record(&mut self, identity: ResourceIdentity, action: Action, outcome: Outcome) {
		self.operations.push(Operation {
			identity,
			action,
			outcome,
		});
	}

	fn count(&self, action: Action) -> usize {
		self.operations
			.iter()
			.filter(|op| op.action == action && op.outcome == Outcome::Applied)
			.count()
	}

	pub fn created(&self) -> usize {
		self.count(Action::Create)
	}

	pub fn updated(&self) -> usize {
		self.count(Action::Update)
	}

	pub fn deleted(&self) -> usize {
		self.count(Action::Delete)
	}

	pub fn unchanged(&self) -> usize {
		self.operations
			.iter()
			.filter(|op| op.outcome == Outcome::Unchanged)
			.count()
	}

	pub fn rejected(&self) -> usize {
		self.operations
			.iter()
			.filter(|op| matches!(op.outcome, Outcome::Rejected(_)))
			.count()
	}

	/// Failed and rejected operations both count as failures.
	pub fn failed(&self) -> usize {
		self.failures().count()
	}

	pub fn failures(&self) -> impl Iterator<Item = &Operation> {
		self.operations
			.iter()
			.filter(|op| matches!(op.outcome, Outcome::Failed(_) | Outcome::Rejected(_)))
	}

	pub fn is_success(&self) -> bool {
		self.failed() == 0
	}
}

/// Converge the cluster on `desired`.
///
/// Creates and updates run in identity order, then prunes. There is no
/// dependency ordering between kinds.
#[instrument(skip_all, fields(desired = desired.len(), live = live.resources.len()))]
pub async fn reconcile<C: ClusterApi>(
	cluster: &C,
	live: &LiveSnapshot,
	desired: DesiredState,
	options: &ReconcileOptions,
) -> ReconcileReport {
	let mut report = ReconcileReport::default();

	let mut desired: Vec<ManifestResource> = desired.into_values().collect();
	desired.sort_by(|a, b| a.identity.cmp(&b.identity));

	// Kind and name of rejected manifests, held back from the prune
	let mut held = HashSet::new();

	for resource in &desired {
		let id = &resource.identity;
		let current = live.resources.get(id);

		if let Some(reason) = scope_mismatch(live, id) {
			tracing::error!(
				api_version = %id.api_version(),
				kind = %id.kind,
				namespace = %id.namespace,
				name = %id.name,
				source = %resource.source.display(),
				reason,
				"rejecting manifest, namespace does not match resource scope"
			);
			let action = if current.is_some() { Action::Update } else { Action::Create };
			report.record(id.clone(), action, Outcome::Rejected(reason.to_string()));
			held.insert(prune_key(id));
			continue;
		}

		let target = resolve_target(live, id);
		match current {
			None => create(cluster, &target, resource, &mut report).await,
			Some(current) => update(cluster, &target, resource, current, options, &mut report).await,
		}
	}

	if options.prune {
		let wanted: HashSet<&ResourceIdentity> = desired.iter().map(|d| &d.identity).collect();
		let mut orphans: Vec<&LiveResource> = live
			.resources
			.values()
			.filter(|r| !wanted.contains(&r.identity) && !held.contains(&prune_key(&r.identity)))
			.collect();
		orphans.sort_by(|a, b| a.identity.cmp(&b.identity));

		for orphan in orphans {
			let target = resolve_target(live, &orphan.identity);
			prune(cluster, &target, orphan, &mut report).await;
		}
	}

	tracing::debug!(
		created = report.created(),
		updated = report.updated(),
		deleted = report.deleted(),
		unchanged = report.unchanged(),
		failed = report.failed(),
		rejected = report.rejected(),
		"reconcile finished"
	);
	report
}

/// Why `identity` cannot be applied as written, if its kind was discovered
/// with a scope its namespace contradicts.
fn scope_mismatch(live: &LiveSnapshot, identity: &ResourceIdentity) -> Option<&'static str> {
	let discovered = live
		.catalog
		.lookup(&identity.group, &identity.version, &identity.kind)?;
	match (discovered.scope, identity.is_namespaced()) {
		(ResourceScope::Namespaced, false) => Some("namespaced kind without metadata.namespace"),
		(ResourceScope::ClusterWide, true) => Some("cluster-scoped kind with metadata.namespace"),
		_ => None,
	}
}

/// Everything but the namespace.
fn prune_key(identity: &ResourceIdentity) -> (&str, &str, &str, &str) {
	(&identity.group, &identity.version, &identity.kind, &identity.name)
}

/// Address for `identity`: the advertised plural when the kind was
/// discovered, the lexical mapping otherwise.
fn resolve_target(live: &LiveSnapshot, identity: &ResourceIdentity) -> ResourceTarget {
	let plural = match live
		.catalog
		.lookup(&identity.group, &identity.version, &identity.kind)
	{
		Some(discovered) => discovered.plural.clone(),
		None => plural_from_kind(&identity.kind),
	};
	ResourceTarget::for_identity(identity, plural)
}

async fn create<C: ClusterApi>(
	cluster: &C,
	target: &ResourceTarget,
	resource: &ManifestResource,
	report: &mut ReconcileReport,
) {
	let id = &resource.identity;
	tracing::info!(kind = %id.kind, namespace = %id.namespace, name = %id.name, "creating {}", id);

	let outcome = match cluster.create(target, &resource.object).await {
		Ok(()) => Outcome::Applied,
		Err(e) => {
			tracing::error!(
				kind = %id.kind,
				namespace = %id.namespace,
				name = %id.name,
				action = %Action::Create,
				error = %e,
				"failed to create resource"
			);
			Outcome::Failed(e.to_string())
		}
	};
	report.record(id.clone(), Action::Create, outcome);
}

async fn update<C: ClusterApi>(
	cluster: &C,
	target: &ResourceTarget,
	resource: &ManifestResource,
	current: &LiveResource,
	options: &ReconcileOptions,
	report: &mut ReconcileReport,
) {
	let id = &resource.identity;

	if options.update_mode == UpdateMode::SkipUnchanged && manifest_matches_live(resource, current) {
		tracing::debug!(kind = %id.kind, namespace = %id.namespace, name = %id.name, "unchanged {}", id);
		report.record(id.clone(), Action::Update, Outcome::Unchanged);
		return;
	}

	tracing::info!(kind = %id.kind, namespace = %id.namespace, name = %id.name, "updating {}", id);

	let mut object = resource.object.clone();
	object.metadata.resource_version = current.resource_version().map(str::to_string);

	let outcome = match cluster.replace(target, &id.name, &object).await {
		Ok(()) => Outcome::Applied,
		Err(e) => {
			tracing::error!(
				kind = %id.kind,
				namespace = %id.namespace,
				name = %id.name,
				action = %Action::Update,
				error = %e,
				"failed to update resource"
			);
			Outcome::Failed(e.to_string())
		}
	};
	report.record(id.clone(), Action::Update, outcome);
}

async fn prune<C: ClusterApi>(
	cluster: &C,
	target: &ResourceTarget,
	orphan: &LiveResource,
	report: &mut ReconcileReport,
) {
	let id = &orphan.identity;
	tracing::info!(kind = %id.kind, namespace = %id.namespace, name = %id.name, "deleting {}", id);

	let outcome = match cluster.delete(target, &id.name).await {
		Ok(()) => Outcome::Applied,
		Err(e) => {
			tracing::error!(
				kind = %id.kind,
				namespace = %id.namespace,
				name = %id.name,
				action = %Action::Delete,
				error = %e,
				"failed to delete resource"
			);
			Outcome::Failed(e.to_string())
		}
	};
	report.record(id.clone(), Action::Delete, outcome);
}

/// Whether every field set in the manifest already has the same value live.
///
/// Fields only present on the live object (status, server-populated
/// metadata) are ignored.
fn manifest_matches_live(resource: &ManifestResource, current: &LiveResource) -> bool {
	let (Ok(mut desired), Ok(live)) = (
		serde_json::to_value(&resource.object),
		serde_json::to_value(&current.object),
	) else {
		return false;
	};

	// Listed objects carry no apiVersion/kind; identity already matched them
	if let Some(map) = desired.as_object_mut() {
		map.remove("apiVersion");
		map.remove("kind");
	}
	if let Some(metadata) = desired.get_mut("metadata").and_then(|m| m.as_object_mut()) {
		metadata.remove("resourceVersion");
	}

	is_subset(&desired, &live)
}

fn is_subset(desired: &serde_json::Value, live: &serde_json::Value) -> bool {
	use serde_json::Value;

	match (desired, live) {
		(Value::Object(d), Value::Object(l)) => d
			.iter()
			.all(|(key, value)| l.get(key).is_some_and(|lv| is_subset(value, lv))),
		(Value::Array(d), Value::Array(l)) => {
			d.len() == l.len() && d.iter().zip(l).all(|(dv, lv)| is_subset(dv, lv))
		}
		_ => desired == live,
	}
}
