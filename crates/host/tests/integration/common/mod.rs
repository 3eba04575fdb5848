//! Common fixtures for host integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use trellis_bridge::executor::replay::{ReplayExecutor, ReplayJournal};
use trellis_bridge::{BridgeError, BundleLoader, MethodTable, ModuleError, ModuleHolder, NativeModule, RuntimeContext};
use trellis_host::{DevSupport, InstanceManager, InstanceManagerBuilder, RootTag, RootTagAllocator, RootView, RootViewHost};

/// Replay bundle used by most tests.
///
/// Startup and every `runApplication` bump the tally. A device event asks the host to run
/// its default back handler.
pub fn script() -> Value {
	json!({
		"startup": [{ "module": "Tally", "method": "bump" }],
		"functions": {
			"AppRegistry.runApplication": [{ "module": "Tally", "method": "bump" }],
			"RCTDeviceEventEmitter.emit": [{ "module": "DeviceEventManager", "method": "invokeDefaultBackPressHandler" }]
		}
	})
}

/// Blocks module initialization while closed.
#[derive(Default)]
pub struct Gate {
	closed: Mutex<bool>,
	opened: Condvar,
	entered: AtomicUsize,
}

impl Gate {
	pub fn close(&self) {
		*self.closed.lock() = true;
	}

	pub fn open(&self) {
		*self.closed.lock() = false;
		self.opened.notify_all();
	}

	/// Number of initializations that reached the gate.
	pub fn entered(&self) -> usize {
		self.entered.load(Ordering::SeqCst)
	}

	fn pass(&self) {
		self.entered.fetch_add(1, Ordering::SeqCst);
		let mut closed = self.closed.lock();
		while *closed {
			self.opened.wait(&mut closed);
		}
	}
}

pub struct Tally {
	value: AtomicI64,
	disposed: AtomicUsize,
	gate: Arc<Gate>,
}

impl Tally {
	pub fn value(&self) -> i64 {
		self.value.load(Ordering::SeqCst)
	}

	pub fn disposed(&self) -> usize {
		self.disposed.load(Ordering::SeqCst)
	}

	fn bump(&self) -> Result<(), ModuleError> {
		self.value.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn get(&self) -> Result<i64, ModuleError> {
		Ok(self.value())
	}
}

impl NativeModule for Tally {
	fn name(&self) -> &str {
		"Tally"
	}

	fn methods(table: &mut MethodTable<Self>) {
		table.method("bump", Self::bump).method("get", Self::get);
	}

	fn initialize(&self) -> Result<(), ModuleError> {
		self.gate.pass();
		Ok(())
	}

	fn on_instance_dispose(&self) {
		self.disposed.fetch_add(1, Ordering::SeqCst);
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
	Added { tag: RootTag, module: String },
	/// `unmount_sent` is whether the script side had already been asked to unmount.
	Removed { tag: RootTag, unmount_sent: bool },
}

/// Root view host that records every call.
pub struct RecordingHost {
	tags: RootTagAllocator,
	journal: ReplayJournal,
	events: Mutex<Vec<HostEvent>>,
}

impl RecordingHost {
	pub fn events(&self) -> Vec<HostEvent> {
		self.events.lock().clone()
	}

	pub fn mounted(&self) -> Vec<RootTag> {
		self.tags.mounted()
	}
}

impl RootViewHost for RecordingHost {
	fn add_root_view(&self, view: &Arc<dyn RootView>) -> RootTag {
		let tag = self.tags.add_root_view(view);
		self.events.lock().push(HostEvent::Added {
			tag,
			module: view.module_name().to_string(),
		});
		tag
	}

	fn remove_root_view(&self, tag: RootTag) {
		let unmount_sent = self
			.journal
			.function_calls()
			.iter()
			.any(|(_, method, args)| method == "unmountApplicationComponentAtRootTag" && *args == vec![json!(tag)]);
		self.tags.remove_root_view(tag);
		self.events.lock().push(HostEvent::Removed { tag, unmount_sent });
	}
}

#[derive(Default)]
pub struct RecordingDevSupport {
	enabled: AtomicBool,
	cached: Mutex<Option<Arc<dyn BundleLoader>>>,
	pub packager_requests: AtomicUsize,
	pub errors: Mutex<Vec<String>>,
	pub created: AtomicUsize,
	pub destroyed: AtomicUsize,
}

impl RecordingDevSupport {
	pub fn set_cached(&self, loader: Arc<dyn BundleLoader>) {
		*self.cached.lock() = Some(loader);
	}
}

#[async_trait]
impl DevSupport for RecordingDevSupport {
	fn is_enabled(&self) -> bool {
		self.enabled.load(Ordering::SeqCst)
	}

	fn set_enabled(&self, enabled: bool) {
		self.enabled.store(enabled, Ordering::SeqCst);
	}

	fn cached_bundle_loader(&self) -> Option<Arc<dyn BundleLoader>> {
		self.cached.lock().clone()
	}

	/// Never answers; resolves only once the attempt is cancelled.
	async fn packager_bundle_loader(&self, token: CancellationToken) -> Result<Arc<dyn BundleLoader>, BridgeError> {
		self.packager_requests.fetch_add(1, Ordering::SeqCst);
		token.cancelled().await;
		Err(BridgeError::Cancelled)
	}

	fn handle_exception(&self, error: BridgeError) {
		self.errors.lock().push(error.to_string());
	}

	fn on_new_context_created(&self, _: &Arc<RuntimeContext>) {
		self.created.fetch_add(1, Ordering::SeqCst);
	}

	fn on_context_destroyed(&self, _: &Arc<RuntimeContext>) {
		self.destroyed.fetch_add(1, Ordering::SeqCst);
	}
}

pub struct Fixture {
	_dir: tempfile::TempDir,
	pub bundle: PathBuf,
	pub journal: ReplayJournal,
	pub host: Arc<RecordingHost>,
	pub gate: Arc<Gate>,
	pub tallies: Arc<Mutex<Vec<Arc<Tally>>>>,
	pub fatal: Arc<Mutex<Vec<String>>>,
	pub manager: Arc<InstanceManager>,
}

/// Manager loading `bundle` from a file.
pub fn fixture(bundle: Value) -> Fixture {
	Fixture::build(bundle, |builder, path| builder.bundle_file(path))
}

impl Fixture {
	/// Writes `bundle` to a temporary file and builds a manager around it. `configure` gets
	/// the bundle path and decides whether the manager loads it.
	pub fn build(bundle: Value, configure: impl FnOnce(InstanceManagerBuilder, &Path) -> InstanceManagerBuilder) -> Self {
		let _ = tracing_subscriber::fmt::try_init();
		let dir = tempfile::tempdir().expect("failed to create temp dir");
		let path = dir.path().join("index.bundle");
		std::fs::write(&path, bundle.to_string()).expect("failed to write bundle");

		let journal = ReplayJournal::new();
		let host = Arc::new(RecordingHost {
			tags: RootTagAllocator::new(),
			journal: journal.clone(),
			events: Mutex::new(Vec::new()),
		});
		let gate = Arc::new(Gate::default());
		let tallies: Arc<Mutex<Vec<Arc<Tally>>>> = Arc::new(Mutex::new(Vec::new()));
		let fatal = Arc::new(Mutex::new(Vec::new()));

		let package_gate = Arc::clone(&gate);
		let package_tallies = Arc::clone(&tallies);
		let fatal_sink = Arc::clone(&fatal);
		let builder = InstanceManagerBuilder::new()
			.executor_factory(ReplayExecutor::factory(journal.clone()))
			.root_view_host(host.clone())
			.fatal_handler(Arc::new(move |err: BridgeError| fatal_sink.lock().push(err.to_string())))
			.package(move |_: &Arc<RuntimeContext>| {
				let tally = Arc::new(Tally {
					value: AtomicI64::new(0),
					disposed: AtomicUsize::new(0),
					gate: Arc::clone(&package_gate),
				});
				package_tallies.lock().push(Arc::clone(&tally));
				vec![ModuleHolder::from_arc(tally)]
			});
		let manager = configure(builder, &path).build().expect("manager should build");

		Self {
			_dir: dir,
			bundle: path,
			journal,
			host,
			gate,
			tallies,
			fatal,
			manager: Arc::new(manager),
		}
	}

	/// How many times the package was asked for modules.
	pub fn builds(&self) -> usize {
		self.tallies.lock().len()
	}

	pub fn tally(&self, index: usize) -> Arc<Tally> {
		Arc::clone(&self.tallies.lock()[index])
	}

	pub async fn create(&self) -> Arc<RuntimeContext> {
		self.manager
			.create_context(CancellationToken::new())
			.await
			.expect("creation should succeed")
			.expect("creation should not be superseded")
	}

	/// Runs `f` on the manager's dispatcher queue.
	pub async fn on_dispatcher<R: Send + 'static>(&self, f: impl FnOnce(&InstanceManager) -> R + Send + 'static) -> R {
		let manager = Arc::clone(&self.manager);
		self.manager
			.dispatcher()
			.run_sync(move || f(&manager))
			.await
			.expect("dispatcher should run")
	}
}

/// Waits until everything already queued on the context's queues ran, including work those
/// jobs queued in turn.
pub async fn settle(context: &RuntimeContext) {
	let instance = context.instance().expect("context should be live");
	for _ in 0..3 {
		instance.queues().script().run_sync(|| ()).await.expect("script queue should run");
		instance.queues().native_modules().run_sync(|| ()).await.expect("native queue should run");
		instance.queues().dispatcher().run_sync(|| ()).await.expect("dispatcher should run");
	}
}

/// Polls `f` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
	let start = std::time::Instant::now();
	while start.elapsed() < timeout {
		if f() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	false
}
