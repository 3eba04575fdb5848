//! A running bridge: queues, module registry and script executor bound together.
//!
//! [`RuntimeInstance`] is a cheap handle. The executor lives behind a mutex that is only
//! locked from the script queue. Script-to-native batches are parsed on the script queue
//! and fanned out onto module queues; native-to-script calls are enqueued on the script
//! queue. Disposal is idempotent and terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use trellis_worker::QueueConfiguration;

use crate::batch::parse_flushed_queue;
use crate::executor::{ExecutorFactory, MODULE_CONFIG_GLOBAL, NativeHooks, ScriptExecutor};
use crate::marshal::{CallbackId, CallbackSink};
use crate::{BridgeError, BundleLoader, ExceptionHandler, ExecutorError, NativeModule, NativeModuleRegistry};

/// Everything an instance is assembled from.
pub struct InstanceParts {
	pub queues: Arc<QueueConfiguration>,
	pub registry: Arc<NativeModuleRegistry>,
	pub executor_factory: ExecutorFactory,
	pub bundle_loader: Arc<dyn BundleLoader>,
	pub exceptions: ExceptionHandler,
}

struct InstanceInner {
	queues: Arc<QueueConfiguration>,
	registry: Arc<NativeModuleRegistry>,
	executor: Mutex<Option<Box<dyn ScriptExecutor>>>,
	executor_factory: ExecutorFactory,
	bundle_loader: Arc<dyn BundleLoader>,
	exceptions: ExceptionHandler,
	callback_sink: CallbackSink,
	initialized: AtomicBool,
	disposed: AtomicBool,
}

/// Shared handle to a runtime instance.
#[derive(Clone)]
pub struct RuntimeInstance {
	inner: Arc<InstanceInner>,
}

/// Non-owning handle to a runtime instance.
#[derive(Clone, Default)]
pub struct WeakRuntimeInstance {
	inner: Weak<InstanceInner>,
}

impl WeakRuntimeInstance {
	pub fn upgrade(&self) -> Option<RuntimeInstance> {
		self.inner.upgrade().map(|inner| RuntimeInstance { inner })
	}
}

impl std::fmt::Debug for RuntimeInstance {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RuntimeInstance")
			.field("source_url", &self.source_url())
			.field("modules", &self.inner.registry.len())
			.field("disposed", &self.is_disposed())
			.finish_non_exhaustive()
	}
}

impl RuntimeInstance {
	pub fn new(parts: InstanceParts) -> Self {
		let inner = Arc::new_cyclic(|weak: &Weak<InstanceInner>| {
			let weak = weak.clone();
			let callback_sink: CallbackSink = Arc::new(move |id: CallbackId, args: Vec<Value>| {
				let Some(inner) = weak.upgrade() else {
					tracing::debug!(callback = %id, "instance.callback_after_drop");
					return;
				};
				let instance = RuntimeInstance { inner };
				if let Err(err) = instance.invoke_callback(id, args) {
					(instance.inner.exceptions)(err);
				}
			});

			InstanceInner {
				queues: parts.queues,
				registry: parts.registry,
				executor: Mutex::new(None),
				executor_factory: parts.executor_factory,
				bundle_loader: parts.bundle_loader,
				exceptions: parts.exceptions,
				callback_sink,
				initialized: AtomicBool::new(false),
				disposed: AtomicBool::new(false),
			}
		});
		Self { inner }
	}

	pub fn downgrade(&self) -> WeakRuntimeInstance {
		WeakRuntimeInstance {
			inner: Arc::downgrade(&self.inner),
		}
	}

	pub fn queues(&self) -> &Arc<QueueConfiguration> {
		&self.inner.queues
	}

	pub fn registry(&self) -> &Arc<NativeModuleRegistry> {
		&self.inner.registry
	}

	pub fn source_url(&self) -> &str {
		self.inner.bundle_loader.source_url()
	}

	pub fn callback_sink(&self) -> &CallbackSink {
		&self.inner.callback_sink
	}

	pub fn is_initialized(&self) -> bool {
		self.inner.initialized.load(Ordering::Acquire)
	}

	pub fn is_disposed(&self) -> bool {
		self.inner.disposed.load(Ordering::Acquire)
	}

	pub fn module<M: NativeModule>(&self) -> Option<Arc<M>> {
		self.inner.registry.module::<M>()
	}

	/// Runs module initialization on each module's queue. Only the first call does anything.
	pub async fn initialize(&self) -> Result<(), BridgeError> {
		if self.inner.initialized.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		self.inner.registry.notify_initialized(self.inner.queues.native_modules()).await
	}

	/// Creates the executor, publishes module metadata and runs the bundle on the script
	/// queue, then dispatches the calls the bundle queued.
	pub async fn initialize_bridge(&self) -> Result<(), BridgeError> {
		let this = self.clone();
		self.inner.queues.script().run_sync(move || this.bootstrap_script()).await?
	}

	fn bootstrap_script(&self) -> Result<(), BridgeError> {
		let mut executor = (self.inner.executor_factory)()?;
		executor.install_native_hooks(self.native_hooks());
		executor.set_global_variable(MODULE_CONFIG_GLOBAL, serde_json::json!({ "remoteModuleConfig": self.inner.registry.module_config() }))?;

		tracing::debug!(source_url = self.source_url(), "instance.load_bundle");
		let flushed = self.inner.bundle_loader.load(executor.as_mut())?;
		*self.inner.executor.lock() = Some(executor);
		self.process_flushed(flushed)
	}

	fn native_hooks(&self) -> NativeHooks {
		let weak = self.downgrade();
		NativeHooks::new(move |module_id, method_id, args| {
			let instance = weak.upgrade().ok_or(BridgeError::NoActiveInstance)?;
			instance.invoke_sync(module_id, method_id, &args)
		})
	}

	/// Dispatches a flushed batch and schedules batch completion behind it. Script queue only.
	fn process_flushed(&self, flushed: Value) -> Result<(), BridgeError> {
		let calls = parse_flushed_queue(flushed)?;
		if calls.is_empty() {
			return Ok(());
		}

		tracing::trace!(calls = calls.len(), "instance.batch");
		for call in calls {
			if let Err(err) = self.invoke(call.module_id, call.method_id, call.args) {
				(self.inner.exceptions)(err);
			}
		}

		let registry = Arc::clone(&self.inner.registry);
		self.inner.queues.native_modules().dispatch(move || registry.on_batch_complete())?;
		Ok(())
	}

	fn with_executor<T>(&self, f: impl FnOnce(&mut dyn ScriptExecutor) -> Result<T, ExecutorError>) -> Result<T, BridgeError> {
		let mut executor = self.inner.executor.lock();
		let executor = executor.as_mut().ok_or(ExecutorError::Unavailable)?;
		Ok(f(executor.as_mut())?)
	}

	fn ensure_live(&self) -> Result<(), BridgeError> {
		if self.is_disposed() {
			return Err(BridgeError::NoActiveInstance);
		}
		Ok(())
	}

	/// Enqueues a script function call on the script queue.
	pub fn call_function(&self, module: &str, method: &str, args: Vec<Value>) -> Result<(), BridgeError> {
		self.ensure_live()?;
		let this = self.clone();
		let (module, method) = (module.to_string(), method.to_string());
		self.inner.queues.script().dispatch(move || {
			let result = this
				.with_executor(|executor| executor.call_function(&module, &method, args))
				.and_then(|flushed| this.process_flushed(flushed));
			if let Err(err) = result {
				tracing::warn!(module = %module, method = %method, error = %err, "instance.call_function_failed");
				(this.inner.exceptions)(err);
			}
		})?;
		Ok(())
	}

	/// Enqueues a callback invocation on the script queue.
	pub fn invoke_callback(&self, id: CallbackId, args: Vec<Value>) -> Result<(), BridgeError> {
		self.ensure_live()?;
		let this = self.clone();
		self.inner.queues.script().dispatch(move || {
			let result = this
				.with_executor(|executor| executor.invoke_callback(id, args))
				.and_then(|flushed| this.process_flushed(flushed));
			if let Err(err) = result {
				(this.inner.exceptions)(err);
			}
		})?;
		Ok(())
	}

	/// Dispatches a native call onto its module queue.
	pub fn invoke(&self, module_id: usize, method_id: usize, args: Vec<Value>) -> Result<(), BridgeError> {
		self.inner
			.registry
			.invoke(self.inner.queues.native_modules(), &self.inner.callback_sink, module_id, method_id, args)
	}

	/// Runs a native call inline and returns its result.
	pub fn invoke_sync(&self, module_id: usize, method_id: usize, args: &[Value]) -> Result<Option<Value>, BridgeError> {
		self.inner.registry.invoke_sync(&self.inner.callback_sink, module_id, method_id, args)
	}

	/// Runs a native call on its module queue and waits for the result.
	pub async fn invoke_async(&self, module_id: usize, method_id: usize, args: Vec<Value>) -> Result<Option<Value>, BridgeError> {
		self.inner
			.registry
			.invoke_async(self.inner.queues.native_modules(), &self.inner.callback_sink, module_id, method_id, args)
			.await
	}

	/// Disposes modules, the executor and the per-instance queues. Only the first call does
	/// anything; later calls return immediately.
	pub async fn dispose(&self) {
		if self.inner.disposed.swap(true, Ordering::AcqRel) {
			return;
		}
		tracing::debug!(source_url = self.source_url(), "instance.dispose");

		if let Err(err) = self.inner.registry.notify_disposed(self.inner.queues.native_modules()).await {
			tracing::warn!(error = %err, "instance.module_dispose_failed");
		}

		let this = self.clone();
		let disposed = self
			.inner
			.queues
			.script()
			.run_sync(move || {
				if let Some(mut executor) = this.inner.executor.lock().take() {
					executor.dispose();
				}
			})
			.await;
		if let Err(err) = disposed {
			tracing::warn!(error = %err, "instance.executor_dispose_failed");
		}

		self.inner.queues.dispose();
	}
}
