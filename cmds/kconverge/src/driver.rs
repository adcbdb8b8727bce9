//! The polling loop: enumerate, load, reconcile, wait, repeat.

use std::{future::Future, path::PathBuf, time::Duration};

use bon::Builder;
use thiserror::Error;
use tracing::instrument;

use crate::{
	k8s::cluster::ClusterApi,
	live::{enumerate_live_state, EnumerateError},
	manifest::{load_manifests, ManifestError},
	reconcile::{reconcile, ReconcileOptions, ReconcileReport},
};

/// Time between the end of one pass and the start of the next.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Errors that abort a whole pass. The next pass is attempted regardless.
#[derive(Debug, Error)]
pub enum PassError {
	#[error(transparent)]
	Discovery(#[from] EnumerateError),

	#[error(transparent)]
	Manifests(#[from] ManifestError),
}

#[derive(Debug, Default)]
pub struct PassSummary {
	pub live_objects: usize,
	pub desired_objects: usize,
	pub skipped_types: Vec<String>,
	pub skipped_files: usize,
	pub rejected_documents: usize,
	pub report: ReconcileReport,
}

impl PassSummary {
	pub fn log(&self) {
		tracing::info!(
			live = self.live_objects,
			desired = self.desired_objects,
			created = self.report.created(),
			updated = self.report.updated(),
			deleted = self.report.deleted(),
			unchanged = self.report.unchanged(),
			failed = self.report.failed(),
			rejected = self.report.rejected(),
			"pass complete"
		);
		if !self.skipped_types.is_empty() {
			tracing::warn!(types = ?self.skipped_types, "some resource types could not be listed");
		}
		if self.skipped_files > 0 || self.rejected_documents > 0 {
			tracing::warn!(
				files = self.skipped_files,
				documents = self.rejected_documents,
				"some manifests were skipped"
			);
		}
	}

	/// True when every step of the pass went through.
	pub fn is_clean(&self) -> bool {
		self.report.is_success()
			&& self.skipped_types.is_empty()
			&& self.skipped_files == 0
			&& self.rejected_documents == 0
	}
}

/// Drives reconcile passes against one cluster.
#[derive(Builder)]
pub struct Reconciler<C> {
	cluster: C,
	/// Root of the manifest tree.
	#[builder(into)]
	directory: PathBuf,
	#[builder(default)]
	options: ReconcileOptions,
	#[builder(default = DEFAULT_INTERVAL)]
	interval: Duration,
}

impl<C: ClusterApi> Reconciler<C> {
	pub fn cluster(&self) -> &C {
		&self.cluster
	}

	/// One full enumerate, load and reconcile cycle.
	#[instrument(skip(self), fields(directory = %self.directory.display()))]
	pub async fn run_pass(&self) -> Result<PassSummary, PassError> {
		let live = enumerate_live_state(&self.cluster).await?;
		let load = load_manifests(&self.directory)?;

		let desired_objects = load.resources.len();
		let report = reconcile(&self.cluster, &live, load.resources, &self.options).await;

		Ok(PassSummary {
			live_objects: live.resources.len(),
			desired_objects,
			skipped_types: live.skipped_types,
			skipped_files: load.skipped_files,
			rejected_documents: load.rejected_documents,
			report,
		})
	}

	/// Run passes until `shutdown` completes, returning the number of passes.
	///
	/// Shutdown is only observed between passes. A failed pass is logged and
	/// retried after the interval.
	pub async fn run<F>(&self, shutdown: F) -> usize
	where
		F: Future<Output = ()>,
	{
		tokio::pin!(shutdown);
		let mut passes = 0;

		loop {
			passes += 1;
			match self.run_pass().await {
				Ok(summary) => summary.log(),
				Err(e) => tracing::error!(error = %e, "pass failed"),
			}

			tokio::select! {
				_ = &mut shutdown => {
					tracing::info!(passes, "shutting down");
					return passes;
				}
				_ = tokio::time::sleep(self.interval) => {}
			}
		}
	}
}
