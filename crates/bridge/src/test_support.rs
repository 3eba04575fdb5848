use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use trellis_worker::{MessageQueue, QueueConfiguration, QueueError, QueueOptions, QueueRole, QueueSpec};

use crate::executor::replay::{ReplayExecutor, ReplayJournal};
use crate::marshal::{Callback, Promise};
use crate::{
	BridgeError, Bundle, BundleLoader, BundleSource, ExceptionHandler, ExecutorError, InstanceParts, MethodTable, ModuleError, NativeModule, NativeModuleRegistry,
	NativeModuleRegistryBuilder, RuntimeInstance, ScriptExecutor,
};

#[derive(Default)]
pub(crate) struct Counter {
	pub value: AtomicI64,
	pub initialized: AtomicUsize,
	pub disposed: AtomicUsize,
	pub batches: AtomicUsize,
}

impl Counter {
	fn increment(&self) -> Result<(), ModuleError> {
		self.value.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn get(&self) -> Result<i64, ModuleError> {
		Ok(self.value.load(Ordering::SeqCst))
	}

	fn add(&self, amount: i64) -> Result<(), ModuleError> {
		self.value.fetch_add(amount, Ordering::SeqCst);
		Ok(())
	}

	fn fetch(&self, promise: Promise) -> Result<(), ModuleError> {
		promise.resolve(self.value.load(Ordering::SeqCst));
		Ok(())
	}

	fn report(&self, label: String, callback: Callback) -> Result<(), ModuleError> {
		callback.invoke(vec![json!(label), json!(self.value.load(Ordering::SeqCst))]);
		Ok(())
	}
}

impl NativeModule for Counter {
	fn name(&self) -> &str {
		"Counter"
	}

	fn constants(&self) -> Map<String, Value> {
		let mut constants = Map::new();
		constants.insert("initial".to_string(), json!(0));
		constants
	}

	fn methods(table: &mut MethodTable<Self>) {
		table
			.method("increment", Self::increment)
			.method("get", Self::get)
			.method("add", Self::add)
			.method("fetch", Self::fetch)
			.method("report", Self::report);
	}

	fn initialize(&self) -> Result<(), ModuleError> {
		self.initialized.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn on_instance_dispose(&self) {
		self.disposed.fetch_add(1, Ordering::SeqCst);
	}

	fn observes_batch_complete(&self) -> bool {
		true
	}

	fn on_batch_complete(&self) {
		self.batches.fetch_add(1, Ordering::SeqCst);
	}
}

/// Bundle held in memory.
#[derive(Debug)]
pub(crate) struct InlineBundle(pub String);

impl BundleLoader for InlineBundle {
	fn source_url(&self) -> &str {
		"inline://bundle"
	}

	fn load(&self, executor: &mut dyn ScriptExecutor) -> Result<Value, ExecutorError> {
		executor.load_and_run(&Bundle {
			source_url: self.source_url().to_string(),
			source: BundleSource::Script(self.0.clone()),
		})
	}
}

/// Exception handler that records error messages.
pub(crate) fn recording_handler() -> (ExceptionHandler, Arc<Mutex<Vec<String>>>) {
	let errors = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&errors);
	(Arc::new(move |err: BridgeError| sink.lock().push(err.to_string())), errors)
}

pub(crate) fn spawn_dispatcher() -> MessageQueue {
	MessageQueue::spawn(QueueSpec::new("dispatcher", QueueRole::Dispatcher), Arc::new(|_| {})).expect("dispatcher should spawn")
}

pub(crate) fn counter_registry(exceptions: &ExceptionHandler) -> (NativeModuleRegistry, Arc<Counter>) {
	let mut builder = NativeModuleRegistryBuilder::new(Arc::clone(exceptions));
	builder.add(Counter::default()).expect("counter should register");
	let registry = builder.build().expect("registry should build");
	let counter = registry.module::<Counter>().expect("counter should be registered");
	(registry, counter)
}

pub(crate) fn build_instance(dispatcher: &MessageQueue, registry: NativeModuleRegistry, bundle: Value, journal: &ReplayJournal, exceptions: ExceptionHandler) -> RuntimeInstance {
	let on_error = Arc::clone(&exceptions);
	let queues = QueueConfiguration::create(dispatcher, &QueueOptions::default(), Arc::new(move |err: QueueError| on_error(err.into()))).expect("queues should spawn");
	RuntimeInstance::new(InstanceParts {
		queues: Arc::new(queues),
		registry: Arc::new(registry),
		executor_factory: ReplayExecutor::factory(journal.clone()),
		bundle_loader: Arc::new(InlineBundle(bundle.to_string())),
		exceptions,
	})
}

/// Waits until everything already queued on the instance's script and native queues ran.
pub(crate) async fn settle(instance: &RuntimeInstance) {
	for _ in 0..2 {
		instance.queues().script().run_sync(|| ()).await.expect("script queue should run");
		instance.queues().native_modules().run_sync(|| ()).await.expect("native queue should run");
	}
}
