//! Configuration file support for kconverge.
//!
//! The file supplies the manifest directory and pass settings. Command line
//! flags override whatever the file sets.

use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
	driver::DEFAULT_INTERVAL,
	reconcile::{ReconcileOptions, UpdateMode},
};

/// Where the config file is looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/app/config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("intervalSeconds must be greater than zero")]
	ZeroInterval,

	#[error("no manifest directory configured; set `directory` in the config file or pass --directory")]
	MissingDirectory,
}

/// Contents of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
	/// Root of the manifest tree.
	#[serde(default)]
	pub directory: Option<PathBuf>,

	#[serde(default)]
	pub interval_seconds: Option<u64>,

	#[serde(default)]
	pub update_mode: Option<UpdateMode>,

	#[serde(default)]
	pub prune: Option<bool>,
}

impl Config {
	pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// An empty document yields the default config.
	pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
		if content.trim().is_empty() {
			return Ok(Self::default());
		}
		serde_yaml::from_str(content)
	}
}

/// Values given on the command line; `None` defers to the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
	pub directory: Option<PathBuf>,
	pub interval_seconds: Option<u64>,
	pub update_mode: Option<UpdateMode>,
	pub no_prune: bool,
}

/// Fully resolved settings for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
	pub directory: PathBuf,
	pub interval: Duration,
	pub options: ReconcileOptions,
}

impl Settings {
	/// Merge `overrides` over `config`, then apply defaults.
	pub fn resolve(config: Config, overrides: Overrides) -> Result<Self, ConfigError> {
		let directory = overrides
			.directory
			.or(config.directory)
			.ok_or(ConfigError::MissingDirectory)?;

		let interval = match overrides.interval_seconds.or(config.interval_seconds) {
			Some(0) => return Err(ConfigError::ZeroInterval),
			Some(secs) => Duration::from_secs(secs),
			None => DEFAULT_INTERVAL,
		};

		let prune = !overrides.no_prune && config.prune.unwrap_or(true);

		Ok(Self {
			directory,
			interval,
			options: ReconcileOptions {
				update_mode: overrides
					.update_mode
					.or(config.update_mode)
					.unwrap_or_default(),
				prune,
			},
		})
	}

	/// Load the config file and merge `overrides` over it.
	///
	/// An explicit path must exist. The default path is optional as long as
	/// `--directory` supplies the manifest root.
	pub fn load(explicit: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
		let config = match explicit {
			Some(path) => Config::load_from_file(path)?,
			None => {
				let path = Path::new(DEFAULT_CONFIG_PATH);
				if path.exists() {
					Config::load_from_file(path)?
				} else {
					tracing::debug!(path = DEFAULT_CONFIG_PATH, "no config file found, using flags only");
					Config::default()
				}
			}
		};
		Self::resolve(config, overrides)
	}
}
