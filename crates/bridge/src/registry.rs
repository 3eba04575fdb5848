//! Native module registry.
//!
//! [`NativeModuleRegistryBuilder`] collects modules keyed by name, enforcing uniqueness
//! unless the incoming module opts into overriding. [`NativeModuleRegistryBuilder::build`]
//! compiles every method and freezes the table into a [`NativeModuleRegistry`], whose
//! module and method indices stay fixed for the lifetime of the instance.

use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use trellis_worker::{MessageQueue, QueueError, QueueOptions, QueueRole};

use crate::marshal::{CallbackSink, CompiledMethod, MethodKind};
use crate::{BridgeError, ExceptionHandler, ModuleError, ModuleHolder, NativeModule};

/// Collects modules before the registry is frozen.
pub struct NativeModuleRegistryBuilder {
	modules: IndexMap<String, ModuleHolder>,
	exceptions: ExceptionHandler,
	queue_options: QueueOptions,
}

impl std::fmt::Debug for NativeModuleRegistryBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NativeModuleRegistryBuilder")
			.field("modules", &self.modules.keys().collect::<Vec<_>>())
			.field("queue_options", &self.queue_options)
			.finish_non_exhaustive()
	}
}

impl NativeModuleRegistryBuilder {
	/// `exceptions` receives failures from dispatched calls and dedicated module queues.
	pub fn new(exceptions: ExceptionHandler) -> Self {
		Self {
			modules: IndexMap::new(),
			exceptions,
			queue_options: QueueOptions::default(),
		}
	}

	/// Options for dedicated module queues spawned at build.
	pub fn queue_options(mut self, options: QueueOptions) -> Self {
		self.queue_options = options;
		self
	}

	pub fn add<M: NativeModule>(&mut self, module: M) -> Result<&mut Self, BridgeError> {
		self.add_holder(Some(ModuleHolder::new(module)))
	}

	/// Adds a module produced by a provider that may yield nothing.
	pub fn add_holder(&mut self, holder: Option<ModuleHolder>) -> Result<&mut Self, BridgeError> {
		let holder = holder.ok_or(BridgeError::NullModule)?;
		let name = holder.name();
		if name.trim().is_empty() {
			return Err(BridgeError::InvalidName {
				type_name: holder.type_name(),
			});
		}

		if let Some(existing) = self.modules.get(name) {
			if !holder.erased().can_override_existing() {
				return Err(BridgeError::DuplicateModule {
					name: name.to_string(),
					existing: existing.type_name(),
					incoming: holder.type_name(),
				});
			}
			tracing::debug!(module = name, replaced = existing.type_name(), by = holder.type_name(), "registry.override");
		}

		// Replacing an existing key keeps its position.
		self.modules.insert(name.to_string(), holder);
		Ok(self)
	}

	pub fn len(&self) -> usize {
		self.modules.len()
	}

	pub fn is_empty(&self) -> bool {
		self.modules.is_empty()
	}

	/// Compiles all methods and freezes the registry.
	pub fn build(self) -> Result<NativeModuleRegistry, BridgeError> {
		let mut modules = Vec::with_capacity(self.modules.len());
		let mut by_type = HashMap::with_capacity(self.modules.len());

		for (index, (name, holder)) in self.modules.into_iter().enumerate() {
			let module = holder.erased();
			let methods = module.compile_methods()?;
			let queue = if module.dedicated_queue() {
				let queue_name = format!("module:{name}");
				let exceptions = Arc::clone(&self.exceptions);
				let on_error = Arc::new(move |err: QueueError| exceptions(err.into()));
				let queue = MessageQueue::spawn(self.queue_options.spec(queue_name.clone(), QueueRole::Module), on_error)
					.map_err(|source| BridgeError::QueueSpawn { queue: queue_name, source })?;
				Some(queue)
			} else {
				None
			};

			by_type.insert(holder.type_id(), index);
			modules.push(ModuleDefinition {
				constants: module.constants(),
				name,
				holder,
				methods,
				queue,
			});
		}

		let batch_listeners = modules
			.iter()
			.enumerate()
			.filter(|(_, module)| module.holder.erased().observes_batch_complete())
			.map(|(index, _)| index)
			.collect();

		tracing::debug!(modules = modules.len(), "registry.built");
		Ok(NativeModuleRegistry {
			modules,
			by_type,
			batch_listeners,
			exceptions: self.exceptions,
			disposed: AtomicBool::new(false),
		})
	}
}

/// A registered module with its compiled methods.
#[derive(Debug)]
pub struct ModuleDefinition {
	name: String,
	constants: Map<String, Value>,
	holder: ModuleHolder,
	methods: Vec<CompiledMethod>,
	queue: Option<MessageQueue>,
}

impl ModuleDefinition {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn constants(&self) -> &Map<String, Value> {
		&self.constants
	}

	pub fn methods(&self) -> &[CompiledMethod] {
		&self.methods
	}

	/// Dedicated queue, if the module asked for one.
	pub fn queue(&self) -> Option<&MessageQueue> {
		self.queue.as_ref()
	}

	fn queue_or<'a>(&'a self, native_modules: &'a MessageQueue) -> &'a MessageQueue {
		self.queue.as_ref().unwrap_or(native_modules)
	}

	fn method_ids(&self, kind: MethodKind) -> Vec<usize> {
		self.methods.iter().enumerate().filter(|(_, method)| method.kind() == kind).map(|(index, _)| index).collect()
	}

	/// Wire metadata: `[name, constants, [methods], [syncIds], [promiseIds]]`.
	fn config(&self) -> Value {
		let names: Vec<&str> = self.methods.iter().map(CompiledMethod::name).collect();
		serde_json::json!([self.name, self.constants, names, self.method_ids(MethodKind::Sync), self.method_ids(MethodKind::Promise)])
	}
}

/// Frozen module table.
pub struct NativeModuleRegistry {
	modules: Vec<ModuleDefinition>,
	by_type: HashMap<TypeId, usize>,
	batch_listeners: Vec<usize>,
	exceptions: ExceptionHandler,
	disposed: AtomicBool,
}

impl std::fmt::Debug for NativeModuleRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NativeModuleRegistry")
			.field("modules", &self.modules)
			.field("disposed", &self.disposed.load(Ordering::Acquire))
			.finish_non_exhaustive()
	}
}

impl NativeModuleRegistry {
	pub fn len(&self) -> usize {
		self.modules.len()
	}

	pub fn is_empty(&self) -> bool {
		self.modules.is_empty()
	}

	pub fn modules(&self) -> &[ModuleDefinition] {
		&self.modules
	}

	pub fn module_id(&self, name: &str) -> Option<usize> {
		self.modules.iter().position(|module| module.name == name)
	}

	pub fn method_id(&self, module_id: usize, name: &str) -> Option<usize> {
		self.modules.get(module_id)?.methods.iter().position(|method| method.name() == name)
	}

	/// Typed lookup by module type.
	pub fn module<M: NativeModule>(&self) -> Option<Arc<M>> {
		let index = *self.by_type.get(&TypeId::of::<M>())?;
		self.modules[index].holder.downcast::<M>()
	}

	/// Metadata for every module in build order, as installed on the script side.
	pub fn module_config(&self) -> Value {
		Value::Array(self.modules.iter().map(ModuleDefinition::config).collect())
	}

	fn resolve(&self, module_id: usize, method_id: usize) -> Result<(&ModuleDefinition, &CompiledMethod), BridgeError> {
		let module = self.modules.get(module_id).ok_or(BridgeError::ArgumentOutOfRange {
			target: "module",
			index: module_id,
			len: self.modules.len(),
		})?;
		let method = module.methods.get(method_id).ok_or(BridgeError::ArgumentOutOfRange {
			target: "method",
			index: method_id,
			len: module.methods.len(),
		})?;
		Ok((module, method))
	}

	/// Dispatches a call onto the module's queue without waiting for it.
	///
	/// Index and arity errors are returned directly. Failures while the call runs go to the
	/// registry's exception handler.
	pub fn invoke(&self, native_modules: &MessageQueue, sink: &CallbackSink, module_id: usize, method_id: usize, args: Vec<Value>) -> Result<(), BridgeError> {
		let (module, method) = self.resolve(module_id, method_id)?;
		method.check_arity(&module.name, args.len())?;

		let invoker = Arc::clone(method.invoker());
		let sink = Arc::clone(sink);
		let exceptions = Arc::clone(&self.exceptions);
		let (module_name, method_name) = (module.name.clone(), method.name().to_string());
		module.queue_or(native_modules).dispatch(move || {
			if let Err(err) = invoker(&args, &sink) {
				tracing::warn!(module = %module_name, method = %method_name, error = %err, "registry.invoke_failed");
				exceptions(err);
			}
		})?;
		Ok(())
	}

	/// Runs a call inline on the calling thread and returns its result.
	pub fn invoke_sync(&self, sink: &CallbackSink, module_id: usize, method_id: usize, args: &[Value]) -> Result<Option<Value>, BridgeError> {
		let (_, method) = self.resolve(module_id, method_id)?;
		method.invoker()(args, sink)
	}

	/// Runs a call on the module's queue and resolves with its result.
	pub fn invoke_async(
		&self,
		native_modules: &MessageQueue,
		sink: &CallbackSink,
		module_id: usize,
		method_id: usize,
		args: Vec<Value>,
	) -> impl Future<Output = Result<Option<Value>, BridgeError>> + Send + use<> {
		let pending = self.resolve(module_id, method_id).map(|(module, method)| {
			let invoker = Arc::clone(method.invoker());
			let sink = Arc::clone(sink);
			module.queue_or(native_modules).run_sync(move || invoker(&args, &sink))
		});
		async move { pending?.await? }
	}

	/// Runs every module's `initialize` on its queue and waits for all of them.
	///
	/// A failing module does not stop the others; all failures are returned together.
	pub async fn notify_initialized(&self, native_modules: &MessageQueue) -> Result<(), BridgeError> {
		let pending: Vec<_> = self
			.modules
			.iter()
			.map(|module| {
				let holder = module.holder.clone();
				(module.name.clone(), module.queue_or(native_modules).run_sync(move || holder.erased().initialize()))
			})
			.collect();

		let mut errors = Vec::new();
		for (name, result) in pending {
			match result.await {
				Ok(Ok(())) => {}
				Ok(Err(err)) => errors.push(err.in_module(&name)),
				Err(err) => errors.push(ModuleError::new(err.to_string()).in_module(&name)),
			}
		}

		if errors.is_empty() {
			tracing::debug!(modules = self.modules.len(), "registry.initialized");
			return Ok(());
		}
		for err in &errors {
			tracing::warn!(module = %err.module, error = %err.message, "registry.initialize_failed");
		}
		Err(BridgeError::ModuleLifecycle { phase: "initialize", errors })
	}

	/// Runs every module's dispose hook on its queue, then closes dedicated queues.
	///
	/// Only the first call does anything.
	pub async fn notify_disposed(&self, native_modules: &MessageQueue) -> Result<(), BridgeError> {
		if self.disposed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}

		let pending: Vec<_> = self
			.modules
			.iter()
			.map(|module| {
				let holder = module.holder.clone();
				module.queue_or(native_modules).run_sync(move || holder.erased().on_instance_dispose())
			})
			.collect();

		let mut errors = Vec::new();
		for (module, result) in self.modules.iter().zip(pending) {
			if let Err(err) = result.await {
				errors.push(ModuleError::new(err.to_string()).in_module(&module.name));
			}
			if let Some(queue) = &module.queue {
				queue.close();
			}
		}

		tracing::debug!(modules = self.modules.len(), failures = errors.len(), "registry.disposed");
		if errors.is_empty() {
			Ok(())
		} else {
			Err(BridgeError::ModuleLifecycle { phase: "dispose", errors })
		}
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::Acquire)
	}

	/// Notifies batch-complete listeners, on their dedicated queue if they have one or
	/// inline otherwise. Call from the native-modules queue.
	pub fn on_batch_complete(&self) {
		for &index in &self.batch_listeners {
			let module = &self.modules[index];
			match &module.queue {
				Some(queue) => {
					let holder = module.holder.clone();
					if let Err(err) = queue.dispatch(move || holder.erased().on_batch_complete()) {
						(self.exceptions)(err.into());
					}
				}
				None => module.holder.erased().on_batch_complete(),
			}
		}
	}
}
