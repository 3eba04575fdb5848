use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::marshal::{self, CallSite, CompiledMethod, MethodEntry, MethodHandler};
use crate::{BridgeError, ModuleError};

/// A native capability exposed to the script side.
///
/// Methods are declared in [`NativeModule::methods`]; the declaration order fixes each
/// method's wire index.
pub trait NativeModule: Send + Sync + Sized + 'static {
	/// Name the script side addresses this module by. Must not be blank.
	fn name(&self) -> &str;

	/// Whether this module may replace an earlier registration with the same name.
	fn can_override_existing(&self) -> bool {
		false
	}

	/// Values exported alongside the module metadata. Read once at registry build.
	fn constants(&self) -> Map<String, Value> {
		Map::new()
	}

	/// Declares the bridged methods.
	fn methods(table: &mut MethodTable<Self>);

	/// Run this module's calls and hooks on its own queue instead of the shared
	/// native-modules queue.
	fn dedicated_queue(&self) -> bool {
		false
	}

	fn initialize(&self) -> Result<(), ModuleError> {
		Ok(())
	}

	fn on_instance_dispose(&self) {}

	/// Opt in to [`NativeModule::on_batch_complete`] notifications.
	fn observes_batch_complete(&self) -> bool {
		false
	}

	/// Called after each batch of script calls has been dispatched.
	fn on_batch_complete(&self) {}
}

/// Ordered method declarations for a module type.
pub struct MethodTable<M> {
	entries: Vec<MethodEntry<M>>,
}

impl<M: Send + Sync + 'static> MethodTable<M> {
	fn new() -> Self {
		Self { entries: Vec::new() }
	}

	/// Declares a method. Its wire index is the number of methods declared before it.
	pub fn method<Args, H>(&mut self, name: impl Into<String>, handler: H) -> &mut Self
	where
		H: MethodHandler<M, Args>,
	{
		self.entries.push(MethodEntry {
			name: name.into(),
			signature: H::signature(),
			call: Arc::new(move |module: &M, args: &[Value], site: &CallSite<'_>| handler.call(module, args, site)),
		});
		self
	}
}

pub(crate) trait ErasedModule: Send + Sync {
	fn name(&self) -> &str;
	fn can_override_existing(&self) -> bool;
	fn constants(&self) -> Map<String, Value>;
	fn compile_methods(&self) -> Result<Vec<CompiledMethod>, BridgeError>;
	fn dedicated_queue(&self) -> bool;
	fn initialize(&self) -> Result<(), ModuleError>;
	fn on_instance_dispose(&self);
	fn observes_batch_complete(&self) -> bool;
	fn on_batch_complete(&self);
}

struct Erased<M>(Arc<M>);

impl<M: NativeModule> ErasedModule for Erased<M> {
	fn name(&self) -> &str {
		self.0.name()
	}

	fn can_override_existing(&self) -> bool {
		self.0.can_override_existing()
	}

	fn constants(&self) -> Map<String, Value> {
		self.0.constants()
	}

	fn compile_methods(&self) -> Result<Vec<CompiledMethod>, BridgeError> {
		let mut table = MethodTable::new();
		M::methods(&mut table);

		let module_name = self.0.name();
		let mut seen = HashSet::new();
		let mut methods = Vec::with_capacity(table.entries.len());
		for entry in table.entries {
			if !seen.insert(entry.name.clone()) {
				return Err(BridgeError::UnsupportedSignature {
					module: module_name.to_string(),
					method: entry.name,
					reason: "method names must be unique within a module",
				});
			}
			methods.push(marshal::compile(&self.0, module_name, entry)?);
		}
		Ok(methods)
	}

	fn dedicated_queue(&self) -> bool {
		self.0.dedicated_queue()
	}

	fn initialize(&self) -> Result<(), ModuleError> {
		self.0.initialize()
	}

	fn on_instance_dispose(&self) {
		self.0.on_instance_dispose();
	}

	fn observes_batch_complete(&self) -> bool {
		self.0.observes_batch_complete()
	}

	fn on_batch_complete(&self) {
		self.0.on_batch_complete();
	}
}

/// Type-erased handle to a module instance.
#[derive(Clone)]
pub struct ModuleHolder {
	module: Arc<dyn ErasedModule>,
	any: Arc<dyn Any + Send + Sync>,
	type_id: TypeId,
	type_name: &'static str,
}

impl std::fmt::Debug for ModuleHolder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ModuleHolder").field("name", &self.name()).field("type", &self.type_name).finish()
	}
}

impl ModuleHolder {
	pub fn new<M: NativeModule>(module: M) -> Self {
		Self::from_arc(Arc::new(module))
	}

	pub fn from_arc<M: NativeModule>(module: Arc<M>) -> Self {
		Self {
			module: Arc::new(Erased(Arc::clone(&module))),
			any: module,
			type_id: TypeId::of::<M>(),
			type_name: std::any::type_name::<M>(),
		}
	}

	pub fn name(&self) -> &str {
		self.module.name()
	}

	pub fn type_id(&self) -> TypeId {
		self.type_id
	}

	pub fn type_name(&self) -> &'static str {
		self.type_name
	}

	/// Recovers the concrete module.
	pub fn downcast<M: NativeModule>(&self) -> Option<Arc<M>> {
		Arc::clone(&self.any).downcast::<M>().ok()
	}

	pub(crate) fn erased(&self) -> &dyn ErasedModule {
		self.module.as_ref()
	}
}
