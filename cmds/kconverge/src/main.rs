use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kconverge::{
	config::{Overrides, Settings},
	driver::Reconciler,
	k8s::{client::ClusterConnection, cluster::KubeCluster},
	reconcile::UpdateMode,
	telemetry::{self, LogFormat},
};
use tracing::Level;

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "kconverge")]
#[command(about = "Converge a Kubernetes cluster on a directory of manifests", long_about = None)]
#[command(version)]
struct Cli {
	/// Config file; defaults to /app/config.yaml when it exists
	#[arg(long, short = 'c')]
	config: Option<PathBuf>,

	/// Manifest directory, overriding `directory` from the config file
	#[arg(long, short = 'd')]
	directory: Option<PathBuf>,

	/// Seconds to wait between passes
	#[arg(long)]
	interval_secs: Option<u64>,

	/// How existing objects are updated
	#[arg(long, value_enum)]
	update_mode: Option<UpdateMode>,

	/// Never delete live objects that have no manifest
	#[arg(long)]
	no_prune: bool,

	/// Run a single pass and exit
	#[arg(long)]
	once: bool,

	/// Kubeconfig context to use instead of the ambient configuration
	#[arg(long)]
	context: Option<String>,

	/// Log level (overrides RUST_LOG)
	#[arg(long)]
	log_level: Option<Level>,

	/// Log output format
	#[arg(long, value_enum, default_value_t = LogFormat::Auto)]
	log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	telemetry::init(cli.log_level, cli.log_format)?;

	let settings = Settings::load(
		cli.config.as_deref(),
		Overrides {
			directory: cli.directory,
			interval_seconds: cli.interval_secs,
			update_mode: cli.update_mode,
			no_prune: cli.no_prune,
		},
	)?;

	let connection = match &cli.context {
		Some(context) => ClusterConnection::from_context(context).await,
		None => ClusterConnection::infer().await,
	}
	.context("failed to connect to the cluster")?;

	tracing::info!(
		cluster = %connection.cluster_identifier(),
		version = %connection.server_version().git_version,
		directory = %settings.directory.display(),
		interval_secs = settings.interval.as_secs(),
		update_mode = ?settings.options.update_mode,
		prune = settings.options.prune,
		"starting reconciler"
	);

	let reconciler = Reconciler::builder()
		.cluster(KubeCluster::from(&connection))
		.directory(settings.directory)
		.options(settings.options)
		.interval(settings.interval)
		.build();

	if cli.once {
		let summary = reconciler.run_pass().await.context("reconcile pass failed")?;
		summary.log();
		return Ok(());
	}

	reconciler.run(shutdown_signal()).await;
	Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};

		let mut sigterm = match signal(SignalKind::terminate()) {
			Ok(sigterm) => sigterm,
			Err(e) => {
				tracing::warn!(error = %e, "failed to register SIGTERM handler, only Ctrl-C stops the loop");
				let _ = tokio::signal::ctrl_c().await;
				return;
			}
		};

		tokio::select! {
			_ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
			_ = sigterm.recv() => tracing::info!("received SIGTERM"),
		}
	}

	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
		tracing::info!("received Ctrl-C");
	}
}
