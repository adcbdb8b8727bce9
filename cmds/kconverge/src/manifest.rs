//! Desired-state loading from a directory of YAML manifests.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use k8s::{IdentityError, ResourceIdentity};
use kube::api::DynamicObject;
use thiserror::Error;
use tracing::instrument;
use walkdir::WalkDir;

/// A document decoded from disk.
#[derive(Debug, Clone)]
pub struct ManifestResource {
	pub identity: ResourceIdentity,
	pub object: DynamicObject,
	/// File the document was read from.
	pub source: PathBuf,
}

pub type DesiredState = HashMap<ResourceIdentity, ManifestResource>;

/// Result of loading a manifest tree.
#[derive(Debug, Default)]
pub struct ManifestLoad {
	pub resources: DesiredState,
	pub files_read: usize,
	pub skipped_files: usize,
	pub rejected_documents: usize,
}

#[derive(Debug, Error)]
pub enum ManifestError {
	#[error("manifest directory {}: {source}", path.display())]
	Root {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("manifest path {} is not a directory", .0.display())]
	NotADirectory(PathBuf),
}

/// Why a single document was rejected.
#[derive(Debug, Error)]
pub enum DocumentError {
	#[error("invalid YAML: {0}")]
	Yaml(#[from] serde_yaml::Error),

	#[error(transparent)]
	Identity(#[from] IdentityError),

	#[error("not a Kubernetes object: {0}")]
	Object(#[from] serde_json::Error),
}

/// Load every manifest under `root`.
///
/// Only a missing or non-directory root fails. Unreadable files and
/// undecodable documents are logged and skipped.
#[instrument(skip(root), fields(root = %root.display()))]
pub fn load_manifests(root: &Path) -> Result<ManifestLoad, ManifestError> {
	let metadata = std::fs::metadata(root).map_err(|source| ManifestError::Root {
		path: root.to_path_buf(),
		source,
	})?;
	if !metadata.is_dir() {
		return Err(ManifestError::NotADirectory(root.to_path_buf()));
	}

	let mut load = ManifestLoad::default();
	let walker = WalkDir::new(root)
		.follow_links(true)
		.sort_by_file_name()
		.into_iter();

	for entry in walker {
		let entry = match entry {
			Ok(entry) => entry,
			Err(e) => {
				tracing::warn!(error = %e, "failed to walk manifest directory entry, skipping");
				load.skipped_files += 1;
				continue;
			}
		};
		if !entry.file_type().is_file() || !is_manifest_file(entry.path()) {
			continue;
		}

		let path = entry.path();
		let content = match std::fs::read_to_string(path) {
			Ok(content) => content,
			Err(e) => {
				tracing::warn!(path = %path.display(), error = %e, "failed to read manifest file, skipping");
				load.skipped_files += 1;
				continue;
			}
		};
		load.files_read += 1;
		load_file(&mut load, path, &content);
	}

	tracing::debug!(
		resources = load.resources.len(),
		files = load.files_read,
		skipped_files = load.skipped_files,
		rejected = load.rejected_documents,
		"loaded manifests"
	);
	Ok(load)
}

fn is_manifest_file(path: &Path) -> bool {
	matches!(
		path.extension().and_then(|e| e.to_str()),
		Some("yaml" | "yml")
	)
}

fn load_file(load: &mut ManifestLoad, path: &Path, content: &str) {
	for (index, document) in split_documents(content).iter().enumerate() {
		let object = match decode_document(document) {
			Ok(Some(object)) => object,
			Ok(None) => continue,
			Err(e) => {
				tracing::warn!(
					path = %path.display(),
					document = index + 1,
					error = %e,
					"skipping invalid manifest document"
				);
				load.rejected_documents += 1;
				continue;
			}
		};

		let identity = object.identity.clone();
		let resource = ManifestResource {
			identity: object.identity,
			object: object.object,
			source: path.to_path_buf(),
		};
		if let Some(previous) = load.resources.insert(identity.clone(), resource) {
			tracing::debug!(
				resource = %identity,
				previous = %previous.source.display(),
				path = %path.display(),
				"duplicate manifest, later document wins"
			);
		}
	}
}

/// Split a YAML stream into its documents.
///
/// A separator is a line starting with `---` followed by nothing, whitespace,
/// a comment, or inline content which then belongs to the next document.
/// Directive lines (`%YAML`, `%TAG`) are dropped.
pub fn split_documents(content: &str) -> Vec<String> {
	let mut documents = Vec::new();
	let mut current = String::new();

	for line in content.lines() {
		if let Some(rest) = document_separator(line) {
			documents.push(std::mem::take(&mut current));
			if !rest.is_empty() {
				current.push_str(rest);
				current.push('\n');
			}
			continue;
		}
		if line.trim_end() == "..." || line.starts_with('%') {
			continue;
		}
		current.push_str(line);
		current.push('\n');
	}
	documents.push(current);
	documents
}

fn document_separator(line: &str) -> Option<&str> {
	let rest = line.strip_prefix("---")?;
	if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
		return None;
	}
	let rest = rest.trim();
	if rest.starts_with('#') {
		Some("")
	} else {
		Some(rest)
	}
}

/// A document that decoded into an identifiable object.
#[derive(Debug)]
pub struct DecodedDocument {
	pub identity: ResourceIdentity,
	pub object: DynamicObject,
}

/// Decode one document. Empty documents yield `Ok(None)`.
pub fn decode_document(document: &str) -> Result<Option<DecodedDocument>, DocumentError> {
	let blank = document
		.lines()
		.map(str::trim)
		.all(|l| l.is_empty() || l.starts_with('#'));
	if blank {
		return Ok(None);
	}

	let value: serde_json::Value = serde_yaml::from_str(document)?;
	match &value {
		serde_json::Value::Null => return Ok(None),
		serde_json::Value::Object(map) if map.is_empty() => return Ok(None),
		_ => {}
	}

	let identity = ResourceIdentity::from_manifest(&value)?;
	let object: DynamicObject = serde_json::from_value(value)?;
	Ok(Some(DecodedDocument { identity, object }))
}
