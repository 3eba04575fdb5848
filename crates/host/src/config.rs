//! TOML host configuration.
//!
//! ```toml
//! bundle_file = "index.bundle"
//! main_module_name = "index"
//! use_developer_support = false
//! initial_lifecycle_state = "resumed"
//!
//! [queues]
//! shutdown_ack_timeout_ms = 100
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use trellis_worker::{DEFAULT_SHUTDOWN_ACK_TIMEOUT, QueueOptions};

use crate::LifecycleState;

/// Errors that can occur when loading host configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or an unexpected field.
	#[error("failed to parse host config: {0}")]
	Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
	/// Script bundle shipped with the host. Relative paths resolve against the config file.
	pub bundle_file: Option<PathBuf>,
	/// Application key started on attached roots.
	pub main_module_name: String,
	/// Enables dev support: packager bundles and recoverable startup failures.
	pub use_developer_support: bool,
	pub initial_lifecycle_state: LifecycleState,
	pub queues: QueueSection,
}

impl Default for HostConfig {
	fn default() -> Self {
		Self {
			bundle_file: None,
			main_module_name: "index".to_string(),
			use_developer_support: false,
			initial_lifecycle_state: LifecycleState::default(),
			queues: QueueSection::default(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSection {
	/// How long closing a queue waits for its thread to acknowledge.
	pub shutdown_ack_timeout_ms: u64,
}

impl Default for QueueSection {
	fn default() -> Self {
		Self {
			shutdown_ack_timeout_ms: DEFAULT_SHUTDOWN_ACK_TIMEOUT.as_millis() as u64,
		}
	}
}

impl HostConfig {
	/// Reads and parses `path`.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let mut config = Self::from_toml_str(&text)?;
		if let Some(bundle) = &config.bundle_file
			&& bundle.is_relative()
			&& let Some(dir) = path.parent()
		{
			config.bundle_file = Some(dir.join(bundle));
		}
		tracing::debug!(path = %path.display(), bundle = ?config.bundle_file, "config.loaded");
		Ok(config)
	}

	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(text)?)
	}

	pub fn queue_options(&self) -> QueueOptions {
		QueueOptions {
			shutdown_ack_timeout: Duration::from_millis(self.queues.shutdown_ack_timeout_ms),
		}
	}
}
