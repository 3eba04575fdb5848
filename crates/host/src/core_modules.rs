//! Native modules every context registers ahead of host packages.

use std::sync::{Arc, Weak};

use serde_json::Value;
use trellis_bridge::{BridgeError, MethodTable, ModuleError, ModuleHolder, NativeModule, RuntimeContext};

use crate::{BackHandler, ModulePackage};

fn upgrade(context: &Weak<RuntimeContext>) -> Result<Arc<RuntimeContext>, ModuleError> {
	context.upgrade().ok_or_else(|| ModuleError::new("runtime context has been dropped"))
}

/// Lets the script side fall back to the host's back behavior.
pub struct DeviceEventManager {
	context: Weak<RuntimeContext>,
	default_back: BackHandler,
}

impl DeviceEventManager {
	pub const NAME: &'static str = "DeviceEventManager";

	pub fn new(context: &Arc<RuntimeContext>, default_back: BackHandler) -> Self {
		Self {
			context: Arc::downgrade(context),
			default_back,
		}
	}

	/// Runs the host default back handler on the dispatcher queue.
	fn invoke_default_back_press_handler(&self) -> Result<(), ModuleError> {
		let context = upgrade(&self.context)?;
		let back = Arc::clone(&self.default_back);
		context
			.run_on_dispatcher_queue_thread(move || back())
			.map_err(|err| ModuleError::new(err.to_string()))
	}
}

impl NativeModule for DeviceEventManager {
	fn name(&self) -> &str {
		Self::NAME
	}

	fn methods(table: &mut MethodTable<Self>) {
		table.method("invokeDefaultBackPressHandler", Self::invoke_default_back_press_handler);
	}
}

/// Receives script-side exceptions.
///
/// Soft exceptions are logged. Fatal ones go through the context's exception policy.
pub struct ExceptionsManager {
	context: Weak<RuntimeContext>,
}

impl ExceptionsManager {
	pub const NAME: &'static str = "ExceptionsManager";

	pub fn new(context: &Arc<RuntimeContext>) -> Self {
		Self {
			context: Arc::downgrade(context),
		}
	}

	fn report_soft_exception(&self, message: String, stack: Value, id: i64) -> Result<(), ModuleError> {
		tracing::warn!(id, %message, frames = frame_count(&stack), "exceptions.soft");
		Ok(())
	}

	fn report_fatal_exception(&self, message: String, stack: Value, id: i64) -> Result<(), ModuleError> {
		tracing::error!(id, %message, frames = frame_count(&stack), "exceptions.fatal");
		upgrade(&self.context)?.handle_exception(BridgeError::Fatal(format!("script exception {id}: {message}")));
		Ok(())
	}
}

fn frame_count(stack: &Value) -> usize {
	stack.as_array().map_or(0, Vec::len)
}

impl NativeModule for ExceptionsManager {
	fn name(&self) -> &str {
		Self::NAME
	}

	fn methods(table: &mut MethodTable<Self>) {
		table
			.method("reportSoftException", Self::report_soft_exception)
			.method("reportFatalException", Self::report_fatal_exception);
	}
}

/// Package of the modules above. The manager always adds it first.
pub struct CoreModulesPackage {
	default_back: BackHandler,
}

impl CoreModulesPackage {
	pub fn new(default_back: BackHandler) -> Self {
		Self { default_back }
	}
}

impl ModulePackage for CoreModulesPackage {
	fn create_native_modules(&self, context: &Arc<RuntimeContext>) -> Vec<ModuleHolder> {
		vec![
			ModuleHolder::new(DeviceEventManager::new(context, Arc::clone(&self.default_back))),
			ModuleHolder::new(ExceptionsManager::new(context)),
		]
	}
}
