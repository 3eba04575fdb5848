//! Pluggable script engine boundary.

pub mod replay;

use std::sync::Arc;

use serde_json::Value;

use crate::marshal::CallbackId;
use crate::{BridgeError, Bundle, ExecutorError};

/// Global the module metadata is installed under before the bundle runs.
pub const MODULE_CONFIG_GLOBAL: &str = "__batchedBridgeConfig";

type SyncInvoke = Arc<dyn Fn(usize, usize, Vec<Value>) -> Result<Option<Value>, BridgeError> + Send + Sync>;

/// Native entry points an executor may call while script code runs.
#[derive(Clone)]
pub struct NativeHooks {
	invoke_sync: SyncInvoke,
}

impl NativeHooks {
	pub fn new(invoke_sync: impl Fn(usize, usize, Vec<Value>) -> Result<Option<Value>, BridgeError> + Send + Sync + 'static) -> Self {
		Self {
			invoke_sync: Arc::new(invoke_sync),
		}
	}

	/// Runs a sync module method inline on the calling (script) thread.
	pub fn invoke_sync(&self, module_id: usize, method_id: usize, args: Vec<Value>) -> Result<Option<Value>, BridgeError> {
		(self.invoke_sync)(module_id, method_id, args)
	}
}

impl std::fmt::Debug for NativeHooks {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NativeHooks").finish_non_exhaustive()
	}
}

/// A script engine. Every method is called on the script queue.
///
/// Methods that run script code return the flushed native call queue (see
/// [`crate::batch`]).
pub trait ScriptExecutor: Send {
	/// Receives native entry points before anything else runs.
	fn install_native_hooks(&mut self, hooks: NativeHooks) {
		let _ = hooks;
	}

	fn set_global_variable(&mut self, name: &str, value: Value) -> Result<(), ExecutorError>;

	fn load_and_run(&mut self, bundle: &Bundle) -> Result<Value, ExecutorError>;

	fn call_function(&mut self, module: &str, method: &str, args: Vec<Value>) -> Result<Value, ExecutorError>;

	fn invoke_callback(&mut self, id: CallbackId, args: Vec<Value>) -> Result<Value, ExecutorError>;

	fn dispose(&mut self) {}
}

/// Creates a fresh executor for each runtime instance.
pub type ExecutorFactory = Arc<dyn Fn() -> Result<Box<dyn ScriptExecutor>, ExecutorError> + Send + Sync>;
