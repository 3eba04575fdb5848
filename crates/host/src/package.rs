use std::sync::Arc;

use trellis_bridge::{ModuleHolder, RuntimeContext};

/// Supplies native modules for each new context.
///
/// Called once per creation attempt with the context being built, so modules may keep a
/// handle to it.
pub trait ModulePackage: Send + Sync {
	fn create_native_modules(&self, context: &Arc<RuntimeContext>) -> Vec<ModuleHolder>;
}

impl<F> ModulePackage for F
where
	F: Fn(&Arc<RuntimeContext>) -> Vec<ModuleHolder> + Send + Sync,
{
	fn create_native_modules(&self, context: &Arc<RuntimeContext>) -> Vec<ModuleHolder> {
		self(context)
	}
}
