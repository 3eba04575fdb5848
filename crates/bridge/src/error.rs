use std::path::PathBuf;
use std::sync::Arc;

use trellis_worker::QueueError;

/// Receives errors raised away from the caller, such as failures inside dispatched module
/// calls or lifecycle listeners.
pub type ExceptionHandler = Arc<dyn Fn(BridgeError) + Send + Sync>;

/// Errors produced by the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
	/// A call supplied the wrong number of wire arguments.
	#[error("module '{module}' method '{method}' got {actual} arguments, expected {expected}")]
	ArgumentCountMismatch { module: String, method: String, expected: usize, actual: usize },
	/// A wire argument could not be decoded into the declared parameter type.
	#[error("error extracting argument for module '{module}' method '{method}' at index {index}: {source}")]
	ArgumentDecode {
		module: String,
		method: String,
		index: usize,
		#[source]
		source: serde_json::Error,
	},
	/// A module name collided with an earlier registration that cannot be overridden.
	#[error("native module '{name}' ({incoming}) tried to override {existing}; allow it with can_override_existing")]
	DuplicateModule {
		name: String,
		existing: &'static str,
		incoming: &'static str,
	},
	/// A module declared a blank name.
	#[error("native module {type_name} declared an empty name")]
	InvalidName { type_name: &'static str },
	/// A module provider yielded nothing.
	#[error("native module must not be null")]
	NullModule,
	/// A module or method id was outside the registered range.
	#[error("{target} id {index} is out of range (count {len})")]
	ArgumentOutOfRange { target: &'static str, index: usize, len: usize },
	/// The context was already attached to an instance.
	#[error("runtime context has already been initialized with an instance")]
	AlreadyInitialized,
	/// Context creation already started; recreate instead.
	#[error("context creation has already started; use recreate_context")]
	AlreadyCreated,
	/// Context creation never started; create first.
	#[error("context creation has not started; use create_context")]
	NotYetCreated,
	/// No live runtime instance is attached.
	#[error("no active runtime instance")]
	NoActiveInstance,
	/// Unrecoverable startup or runtime failure.
	#[error("fatal: {0}")]
	Fatal(String),
	/// A module method signature cannot be bridged.
	#[error("module '{module}' method '{method}' has an unsupported signature: {reason}")]
	UnsupportedSignature {
		module: String,
		method: String,
		reason: &'static str,
	},
	/// No module of the requested type is registered.
	#[error("native module {type_name} is not registered")]
	ModuleNotRegistered { type_name: &'static str },
	/// A module method or hook reported a failure.
	#[error(transparent)]
	Module(#[from] ModuleError),
	/// One or more modules failed a lifecycle phase. Every module still ran.
	#[error("module {phase} failed: {}", summarize(.errors))]
	ModuleLifecycle { phase: &'static str, errors: Vec<ModuleError> },
	/// A return value could not be encoded for the wire.
	#[error("failed to encode result of module '{module}' method '{method}': {source}")]
	Encode {
		module: String,
		method: String,
		#[source]
		source: serde_json::Error,
	},
	/// The script side produced a malformed call batch.
	#[error("invalid native call batch: {0}")]
	InvalidBatch(String),
	/// A lifecycle or background listener failed.
	#[error("{event} listener failed: {message}")]
	Listener { event: &'static str, message: String },
	#[error("failed to spawn queue '{queue}': {source}")]
	QueueSpawn {
		queue: String,
		#[source]
		source: std::io::Error,
	},
	#[error(transparent)]
	Queue(#[from] QueueError),
	#[error(transparent)]
	Executor(#[from] ExecutorError),
	/// The caller's own cancellation token fired.
	#[error("operation cancelled")]
	Cancelled,
}

fn summarize(errors: &[ModuleError]) -> String {
	errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Failure reported by a native module.
///
/// Module code usually builds one with [`ModuleError::new`]; the bridge fills in the module
/// name when the error crosses the boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("module '{module}': {message}")]
pub struct ModuleError {
	pub module: String,
	pub message: String,
}

impl ModuleError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			module: String::new(),
			message: message.into(),
		}
	}

	/// Attributes the error to `module` unless it already names one.
	pub fn in_module(mut self, module: &str) -> Self {
		if self.module.is_empty() {
			self.module = module.to_string();
		}
		self
	}
}

/// Errors raised by script executors and bundle loaders.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
	#[error("script error: {0}")]
	Script(String),
	#[error("failed to read bundle {path}: {source}")]
	BundleRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("invalid bundle: {0}")]
	InvalidBundle(String),
	#[error("script executor is not loaded")]
	Unavailable,
}
