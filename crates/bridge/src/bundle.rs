use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::{ExecutorError, ScriptExecutor};

/// Where a bundle's script text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleSource {
	/// Script text read by the host.
	Script(String),
	/// The executor fetches the script itself from the bundle's source URL.
	Remote,
}

/// A script bundle handed to [`ScriptExecutor::load_and_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
	pub source_url: String,
	pub source: BundleSource,
}

/// Loads a bundle into an executor. Runs on the script queue.
pub trait BundleLoader: Send + Sync + std::fmt::Debug {
	/// URL reported to the script side and returned by the host's `source_url`.
	fn source_url(&self) -> &str;

	/// Loads and runs the bundle, returning the first flushed queue.
	fn load(&self, executor: &mut dyn ScriptExecutor) -> Result<Value, ExecutorError>;
}

fn read_script(path: &Path) -> Result<String, ExecutorError> {
	std::fs::read_to_string(path).map_err(|source| ExecutorError::BundleRead {
		path: path.to_path_buf(),
		source,
	})
}

/// Bundle shipped as a file with the host.
#[derive(Debug, Clone)]
pub struct FileBundleLoader {
	path: PathBuf,
	source_url: String,
}

impl FileBundleLoader {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let source_url = path.display().to_string();
		Self { path, source_url }
	}
}

impl BundleLoader for FileBundleLoader {
	fn source_url(&self) -> &str {
		&self.source_url
	}

	fn load(&self, executor: &mut dyn ScriptExecutor) -> Result<Value, ExecutorError> {
		let script = read_script(&self.path)?;
		tracing::debug!(path = %self.path.display(), bytes = script.len(), "bundle.load_file");
		executor.load_and_run(&Bundle {
			source_url: self.source_url.clone(),
			source: BundleSource::Script(script),
		})
	}
}

/// Bundle downloaded from a development server and cached on disk.
#[derive(Debug, Clone)]
pub struct CachedNetworkBundleLoader {
	source_url: String,
	cached_file: PathBuf,
}

impl CachedNetworkBundleLoader {
	pub fn new(source_url: impl Into<String>, cached_file: impl Into<PathBuf>) -> Self {
		Self {
			source_url: source_url.into(),
			cached_file: cached_file.into(),
		}
	}
}

impl BundleLoader for CachedNetworkBundleLoader {
	fn source_url(&self) -> &str {
		&self.source_url
	}

	fn load(&self, executor: &mut dyn ScriptExecutor) -> Result<Value, ExecutorError> {
		let script = read_script(&self.cached_file)?;
		tracing::debug!(url = %self.source_url, cache = %self.cached_file.display(), "bundle.load_cached");
		executor.load_and_run(&Bundle {
			source_url: self.source_url.clone(),
			source: BundleSource::Script(script),
		})
	}
}

/// Bundle executed by a remote debugger that fetches it through a proxy URL.
#[derive(Debug, Clone)]
pub struct RemoteDebuggerBundleLoader {
	proxy_source_url: String,
	real_source_url: String,
}

impl RemoteDebuggerBundleLoader {
	pub fn new(proxy_source_url: impl Into<String>, real_source_url: impl Into<String>) -> Self {
		Self {
			proxy_source_url: proxy_source_url.into(),
			real_source_url: real_source_url.into(),
		}
	}
}

impl BundleLoader for RemoteDebuggerBundleLoader {
	fn source_url(&self) -> &str {
		&self.real_source_url
	}

	fn load(&self, executor: &mut dyn ScriptExecutor) -> Result<Value, ExecutorError> {
		executor.load_and_run(&Bundle {
			source_url: self.proxy_source_url.clone(),
			source: BundleSource::Remote,
		})
	}
}
