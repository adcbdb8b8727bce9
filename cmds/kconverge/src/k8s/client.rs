//! Kubernetes cluster connection management.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context named `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error(transparent)]
	Infer(#[from] InferConfigError),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Represents a connection to a Kubernetes cluster.
///
/// This is the opaque credential capability handed to the reconciler: how it
/// was obtained (in-cluster service account or a kubeconfig context) does not
/// matter past this point.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Human-readable identifier for the cluster (context name or API server URL).
	cluster_identifier: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_identifier", &self.cluster_identifier)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using the ambient configuration.
	///
	/// Prefers the in-cluster service account and falls back to
	/// `$KUBECONFIG` / `~/.kube/config` with its current context.
	#[instrument]
	pub async fn infer() -> Result<Self, ConnectionError> {
		let config = Config::infer().await?;
		let identifier = config.cluster_url.to_string();
		Self::connect(config, identifier).await
	}

	/// Connect using a named context from the local kubeconfig.
	#[instrument]
	pub async fn from_context(context: &str) -> Result<Self, ConnectionError> {
		let kubeconfig = Kubeconfig::read()?;
		Self::from_kubeconfig(kubeconfig, Some(context)).await
	}

	/// Connect using a provided kubeconfig.
	///
	/// With `context` unset the kubeconfig's current context is used.
	#[instrument(skip(kubeconfig))]
	pub async fn from_kubeconfig(
		kubeconfig: Kubeconfig,
		context: Option<&str>,
	) -> Result<Self, ConnectionError> {
		if let Some(name) = context {
			if !kubeconfig.contexts.iter().any(|c| c.name == name) {
				return Err(ConnectionError::ContextNotFound(name.to_string()));
			}
		}

		let identifier = context
			.map(str::to_string)
			.or_else(|| kubeconfig.current_context.clone())
			.map(|name| format!("context:{}", name))
			.unwrap_or_else(|| "kubeconfig".to_string());

		let config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: context.map(str::to_string),
				..Default::default()
			},
		)
		.await?;

		Self::connect(config, identifier).await
	}

	async fn connect(mut config: Config, cluster_identifier: String) -> Result<Self, ConnectionError> {
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		let client = Client::try_from(config)?;
		let server_version = client.apiserver_version().await?;

		tracing::debug!(
			cluster = %cluster_identifier,
			version = %server_version.git_version,
			"connected to cluster"
		);

		Ok(Self {
			client,
			server_version,
			cluster_identifier,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the server version.
	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Get the cluster identifier (context name or API server URL).
	pub fn cluster_identifier(&self) -> &str {
		&self.cluster_identifier
	}
}
