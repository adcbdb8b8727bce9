//! Identity of a Kubernetes object.
//!
//! Live objects and manifest documents are correlated purely by this key,
//! so it is compared field by field with exact string equality.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when a manifest can not be identified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
	#[error("document is not a mapping")]
	NotAnObject,

	#[error("manifest missing {0}")]
	MissingField(&'static str),
}

/// Correlation key between a live object and its manifest counterpart.
///
/// An empty `namespace` denotes a cluster-scoped resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
	pub group: String,
	pub version: String,
	pub kind: String,
	pub namespace: String,
	pub name: String,
}

impl ResourceIdentity {
	pub fn new(
		group: impl Into<String>,
		version: impl Into<String>,
		kind: impl Into<String>,
		namespace: impl Into<String>,
		name: impl Into<String>,
	) -> Self {
		Self {
			group: group.into(),
			version: version.into(),
			kind: kind.into(),
			namespace: namespace.into(),
			name: name.into(),
		}
	}

	/// Compute the identity of a manifest from its own fields.
	///
	/// Requires `apiVersion`, `kind` and `metadata.name`. `metadata.namespace`
	/// is optional; when absent the identity is cluster-scoped.
	pub fn from_manifest(manifest: &serde_json::Value) -> Result<Self, IdentityError> {
		if !manifest.is_object() {
			return Err(IdentityError::NotAnObject);
		}

		let api_version = non_empty_str(manifest, "/apiVersion")
			.ok_or(IdentityError::MissingField("apiVersion"))?;
		let kind = non_empty_str(manifest, "/kind").ok_or(IdentityError::MissingField("kind"))?;
		let name = non_empty_str(manifest, "/metadata/name")
			.ok_or(IdentityError::MissingField("metadata.name"))?;
		let namespace = manifest
			.pointer("/metadata/namespace")
			.and_then(|v| v.as_str())
			.unwrap_or("");

		let (group, version) = split_api_version(api_version);
		Ok(Self::new(group, version, kind, namespace, name))
	}

	/// The `apiVersion` string this identity was built from.
	pub fn api_version(&self) -> String {
		if self.group.is_empty() {
			self.version.clone()
		} else {
			format!("{}/{}", self.group, self.version)
		}
	}

	pub fn is_namespaced(&self) -> bool {
		!self.namespace.is_empty()
	}
}

impl fmt::Display for ResourceIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
	}
}

/// Split an `apiVersion` into `(group, version)`.
///
/// The core group has no prefix: `v1` yields `("", "v1")`.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
	match api_version.split_once('/') {
		Some((group, version)) => (group, version),
		None => ("", api_version),
	}
}

fn non_empty_str<'a>(value: &'a serde_json::Value, pointer: &str) -> Option<&'a str> {
	value
		.pointer(pointer)
		.and_then(|v| v.as_str())
		.filter(|s| !s.is_empty())
}
