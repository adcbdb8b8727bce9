//! Logging setup.

use std::io::IsTerminal;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
	/// Pretty on a terminal, JSON otherwise.
	#[default]
	Auto,
	Pretty,
	Json,
}

impl LogFormat {
	fn use_json(self) -> bool {
		match self {
			LogFormat::Auto => !std::io::stderr().is_terminal(),
			LogFormat::Pretty => false,
			LogFormat::Json => true,
		}
	}
}

/// Initialize tracing with the given log level.
///
/// Priority for log level:
/// 1. `log_level` argument (from --log-level CLI flag)
/// 2. `RUST_LOG` environment variable
/// 3. Default: info
pub fn init(log_level: Option<Level>, format: LogFormat) -> Result<()> {
	let filter_layer = match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	};

	let fmt_layer = if format.use_json() {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.json()
			.boxed()
	} else {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.pretty()
			.boxed()
	};

	tracing_subscriber::registry()
		.with(filter_layer)
		.with(fmt_layer)
		.try_init()
		.context("failed to install the global tracing subscriber")
}
