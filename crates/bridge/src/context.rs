//! Host-facing view of a runtime instance.
//!
//! A [`RuntimeContext`] is handed to modules and host code. It holds a non-owning handle to
//! its instance, exposes thread helpers for the instance's queues, fans lifecycle events out
//! to registered listeners and applies the exception policy.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use trellis_worker::{MessageQueue, QueueRole, panic_message};

use crate::instance::{RuntimeInstance, WeakRuntimeInstance};
use crate::{BridgeError, ExceptionHandler, ModuleError, NativeModule};

/// Receives host lifecycle transitions.
pub trait LifecycleEventListener: Send + Sync {
	fn on_suspend(&self) -> Result<(), ModuleError> {
		Ok(())
	}

	fn on_resume(&self) -> Result<(), ModuleError> {
		Ok(())
	}

	fn on_destroy(&self) -> Result<(), ModuleError> {
		Ok(())
	}
}

/// Receives host foreground/background transitions.
pub trait BackgroundEventListener: Send + Sync {
	fn on_entered_background(&self) -> Result<(), ModuleError> {
		Ok(())
	}

	fn on_leaving_background(&self) -> Result<(), ModuleError> {
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
	Unattached,
	Attached,
	Disposed,
}

pub struct RuntimeContext {
	state: Mutex<ContextState>,
	instance: RwLock<WeakRuntimeInstance>,
	lifecycle_listeners: RwLock<Vec<Arc<dyn LifecycleEventListener>>>,
	background_listeners: RwLock<Vec<Arc<dyn BackgroundEventListener>>>,
	exception_handler: RwLock<Option<ExceptionHandler>>,
	fatal_handler: RwLock<Option<ExceptionHandler>>,
}

impl std::fmt::Debug for RuntimeContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RuntimeContext")
			.field("state", &self.state())
			.field("lifecycle_listeners", &self.lifecycle_listeners.read().len())
			.field("background_listeners", &self.background_listeners.read().len())
			.finish_non_exhaustive()
	}
}

impl Default for RuntimeContext {
	fn default() -> Self {
		Self::new()
	}
}

fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
	std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl RuntimeContext {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(ContextState::Unattached),
			instance: RwLock::new(WeakRuntimeInstance::default()),
			lifecycle_listeners: RwLock::new(Vec::new()),
			background_listeners: RwLock::new(Vec::new()),
			exception_handler: RwLock::new(None),
			fatal_handler: RwLock::new(None),
		}
	}

	pub fn state(&self) -> ContextState {
		*self.state.lock()
	}

	/// Attaches the context to `instance`. Allowed exactly once.
	pub fn initialize_with_instance(&self, instance: &RuntimeInstance) -> Result<(), BridgeError> {
		let mut state = self.state.lock();
		if *state != ContextState::Unattached {
			return Err(BridgeError::AlreadyInitialized);
		}
		*self.instance.write() = instance.downgrade();
		*state = ContextState::Attached;
		tracing::debug!(source_url = instance.source_url(), "context.attached");
		Ok(())
	}

	/// The attached instance, if it is still alive and not disposed.
	pub fn instance(&self) -> Result<RuntimeInstance, BridgeError> {
		if self.state() != ContextState::Attached {
			return Err(BridgeError::NoActiveInstance);
		}
		let instance = self.instance.read().upgrade().ok_or(BridgeError::NoActiveInstance)?;
		if instance.is_disposed() {
			return Err(BridgeError::NoActiveInstance);
		}
		Ok(instance)
	}

	pub fn has_active_instance(&self) -> bool {
		self.instance().is_ok()
	}

	pub fn native_module<M: NativeModule>(&self) -> Result<Arc<M>, BridgeError> {
		self.instance()?.module::<M>().ok_or(BridgeError::ModuleNotRegistered {
			type_name: std::any::type_name::<M>(),
		})
	}

	/// Calls a script-side function through the instance's script queue.
	pub fn call_function(&self, module: &str, method: &str, args: Vec<Value>) -> Result<(), BridgeError> {
		self.instance()?.call_function(module, method, args)
	}

	fn with_queue<T>(&self, role: QueueRole, f: impl FnOnce(&MessageQueue) -> Result<T, BridgeError>) -> Result<T, BridgeError> {
		let instance = self.instance()?;
		let queue = instance.queues().queue(role).ok_or(BridgeError::NoActiveInstance)?;
		f(queue)
	}

	pub fn is_on_dispatcher_queue_thread(&self) -> Result<bool, BridgeError> {
		self.with_queue(QueueRole::Dispatcher, |queue| Ok(queue.is_on_thread()))
	}

	pub fn assert_on_dispatcher_queue_thread(&self) -> Result<(), BridgeError> {
		self.with_queue(QueueRole::Dispatcher, |queue| Ok(queue.assert_on_thread()?))
	}

	pub fn run_on_dispatcher_queue_thread(&self, action: impl FnOnce() + Send + 'static) -> Result<(), BridgeError> {
		self.with_queue(QueueRole::Dispatcher, |queue| Ok(queue.dispatch(action)?))
	}

	pub fn is_on_native_modules_queue_thread(&self) -> Result<bool, BridgeError> {
		self.with_queue(QueueRole::NativeModules, |queue| Ok(queue.is_on_thread()))
	}

	pub fn assert_on_native_modules_queue_thread(&self) -> Result<(), BridgeError> {
		self.with_queue(QueueRole::NativeModules, |queue| Ok(queue.assert_on_thread()?))
	}

	pub fn run_on_native_modules_queue_thread(&self, action: impl FnOnce() + Send + 'static) -> Result<(), BridgeError> {
		self.with_queue(QueueRole::NativeModules, |queue| Ok(queue.dispatch(action)?))
	}

	pub fn is_on_script_queue_thread(&self) -> Result<bool, BridgeError> {
		self.with_queue(QueueRole::Script, |queue| Ok(queue.is_on_thread()))
	}

	pub fn assert_on_script_queue_thread(&self) -> Result<(), BridgeError> {
		self.with_queue(QueueRole::Script, |queue| Ok(queue.assert_on_thread()?))
	}

	pub fn run_on_script_queue_thread(&self, action: impl FnOnce() + Send + 'static) -> Result<(), BridgeError> {
		self.with_queue(QueueRole::Script, |queue| Ok(queue.dispatch(action)?))
	}

	pub fn add_lifecycle_event_listener(&self, listener: Arc<dyn LifecycleEventListener>) {
		self.lifecycle_listeners.write().push(listener);
	}

	pub fn remove_lifecycle_event_listener(&self, listener: &Arc<dyn LifecycleEventListener>) {
		self.lifecycle_listeners.write().retain(|existing| !same_listener(existing, listener));
	}

	pub fn add_background_event_listener(&self, listener: Arc<dyn BackgroundEventListener>) {
		self.background_listeners.write().push(listener);
	}

	pub fn remove_background_event_listener(&self, listener: &Arc<dyn BackgroundEventListener>) {
		self.background_listeners.write().retain(|existing| !same_listener(existing, listener));
	}

	pub fn on_suspend(&self) -> Result<(), BridgeError> {
		self.assert_on_dispatcher_queue_thread()?;
		let listeners = self.lifecycle_listeners.read().clone();
		self.fan_out("suspend", &listeners, |listener| listener.on_suspend());
		Ok(())
	}

	pub fn on_resume(&self) -> Result<(), BridgeError> {
		self.assert_on_dispatcher_queue_thread()?;
		let listeners = self.lifecycle_listeners.read().clone();
		self.fan_out("resume", &listeners, |listener| listener.on_resume());
		Ok(())
	}

	pub fn on_destroy(&self) -> Result<(), BridgeError> {
		self.assert_on_dispatcher_queue_thread()?;
		let listeners = self.lifecycle_listeners.read().clone();
		self.fan_out("destroy", &listeners, |listener| listener.on_destroy());
		Ok(())
	}

	pub fn on_entered_background(&self) -> Result<(), BridgeError> {
		self.assert_on_dispatcher_queue_thread()?;
		let listeners = self.background_listeners.read().clone();
		self.fan_out("entered_background", &listeners, |listener| listener.on_entered_background());
		Ok(())
	}

	pub fn on_leaving_background(&self) -> Result<(), BridgeError> {
		self.assert_on_dispatcher_queue_thread()?;
		let listeners = self.background_listeners.read().clone();
		self.fan_out("leaving_background", &listeners, |listener| listener.on_leaving_background());
		Ok(())
	}

	/// Notifies each listener in the snapshot. A failing listener is reported and the rest
	/// still run.
	fn fan_out<L: ?Sized>(&self, event: &'static str, listeners: &[Arc<L>], notify: impl Fn(&L) -> Result<(), ModuleError>) {
		tracing::trace!(event, listeners = listeners.len(), "context.fan_out");
		for listener in listeners {
			let message = match std::panic::catch_unwind(AssertUnwindSafe(|| notify(listener))) {
				Ok(Ok(())) => continue,
				Ok(Err(err)) => err.to_string(),
				Err(payload) => panic_message(payload.as_ref()).unwrap_or_else(|| "listener panicked".to_string()),
			};
			self.handle_exception(BridgeError::Listener { event, message });
		}
	}

	/// Handler consulted by [`Self::handle_exception`] while an instance is live.
	pub fn set_exception_handler(&self, handler: Option<ExceptionHandler>) {
		*self.exception_handler.write() = handler;
	}

	/// Sink for errors no handler took.
	pub fn set_fatal_handler(&self, handler: Option<ExceptionHandler>) {
		*self.fatal_handler.write() = handler;
	}

	/// Routes `error` to the exception handler when one is set and the instance is live.
	/// Otherwise the error is fatal: it is logged and passed to the fatal handler.
	pub fn handle_exception(&self, error: BridgeError) {
		let handler = self.exception_handler.read().clone();
		if let Some(handler) = handler
			&& self.has_active_instance()
		{
			tracing::debug!(error = %error, "context.exception_delegated");
			handler(error);
			return;
		}

		tracing::error!(error = %error, "context.fatal_exception");
		let fatal = self.fatal_handler.read().clone();
		if let Some(fatal) = fatal {
			fatal(error);
		}
	}

	/// Moves to `Disposed` and disposes the instance if it is still alive. Idempotent.
	pub async fn dispose(&self) {
		let instance = {
			let mut state = self.state.lock();
			if *state == ContextState::Disposed {
				return;
			}
			*state = ContextState::Disposed;
			std::mem::take(&mut *self.instance.write()).upgrade()
		};
		tracing::debug!(had_instance = instance.is_some(), "context.dispose");
		if let Some(instance) = instance {
			instance.dispose().await;
		}
	}
}
