//! Creation, recreation and teardown of the runtime context.
//!
//! Every entry point that creates or disposes a context takes one async lock, so at most
//! one attempt runs at a time. Each attempt holds a generation token from a superseding
//! slot; the token is a child of the suspend token and is linked to the caller's token. An
//! attempt checks its token between phases and unwinds when it fired, disposing whatever it
//! built.
//!
//! The current context, attached roots and lifecycle state are only mutated on the
//! dispatcher queue.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;
use trellis_bridge::{
	AppRegistry, BridgeError, BundleLoader, DeviceEventEmitter, ExceptionHandler, ExecutorFactory, FileBundleLoader, InstanceParts, NativeModuleRegistry,
	NativeModuleRegistryBuilder, RuntimeContext, RuntimeInstance,
};
use trellis_worker::{GenerationToken, MessageQueue, QueueConfiguration, QueueError, QueueOptions, QueueRole, SupersedingCancellation};

use crate::root::same_view;
use crate::{CoreModulesPackage, DevSupport, LifecycleState, LifecycleStateMachine, ModulePackage, RootTag, RootView, RootViewHost};

/// Host behavior for a back press the script side does not handle.
pub type BackHandler = Arc<dyn Fn() + Send + Sync>;

/// Event emitted to the script side on a hardware back press.
const HARDWARE_BACK_PRESS: &str = "hardwareBackPress";

struct LiveContext {
	context: Arc<RuntimeContext>,
	instance: RuntimeInstance,
}

struct AttachedRoot {
	view: Arc<dyn RootView>,
	/// Set while mounted into the current instance.
	tag: Option<RootTag>,
}

#[derive(Debug, Default)]
struct CreationState {
	has_started_creating: bool,
}

/// State reachable from work running on the dispatcher queue.
struct Shared {
	current: ArcSwapOption<LiveContext>,
	roots: Mutex<Vec<AttachedRoot>>,
	lifecycle: Mutex<LifecycleStateMachine>,
	default_back: Mutex<Option<BackHandler>>,
	last_fatal: Mutex<Option<String>>,
	root_host: Arc<dyn RootViewHost>,
	dev_support: Arc<dyn DevSupport>,
}

impl Shared {
	fn live(&self) -> Option<Arc<LiveContext>> {
		self.current.load_full().filter(|live| live.context.has_active_instance())
	}

	fn mount(&self, root: &mut AttachedRoot, instance: &RuntimeInstance) -> Result<(), BridgeError> {
		let tag = self.root_host.add_root_view(&root.view);
		root.tag = Some(tag);
		tracing::debug!(tag, module = root.view.module_name(), "manager.mount_root");
		let params = json!({ "rootTag": tag, "initialProps": root.view.initial_props() });
		AppRegistry::new(instance).run_application(root.view.module_name(), params)
	}

	/// Removes the native root before asking the script side to unmount it.
	fn unmount(&self, root: &mut AttachedRoot, instance: &RuntimeInstance) -> Result<(), BridgeError> {
		let Some(tag) = root.tag.take() else {
			return Ok(());
		};
		self.root_host.remove_root_view(tag);
		tracing::debug!(tag, module = root.view.module_name(), "manager.unmount_root");
		AppRegistry::new(instance).unmount_application_component_at_root_tag(tag)
	}

	/// Publishes a started context and mounts every attached root into it. Dispatcher only.
	fn install(&self, live: Arc<LiveContext>) {
		self.current.store(Some(Arc::clone(&live)));
		self.dev_support.on_new_context_created(&live.context);
		if let Err(err) = self.lifecycle.lock().set_context(Arc::clone(&live.context)) {
			live.context.handle_exception(err);
		}

		let mut roots = self.roots.lock();
		for root in roots.iter_mut() {
			if let Err(err) = self.mount(root, &live.instance) {
				live.context.handle_exception(err);
			}
		}
		tracing::debug!(roots = roots.len(), source_url = live.instance.source_url(), "manager.context_installed");
	}

	/// Detaches the current context from the host and takes it. Dispatcher only.
	fn clear(&self) -> Option<Arc<LiveContext>> {
		let live = self.current.swap(None)?;
		self.lifecycle.lock().clear_context();
		for root in self.roots.lock().iter_mut() {
			root.view.cleanup();
			if let Some(tag) = root.tag.take() {
				self.root_host.remove_root_view(tag);
			}
		}
		Some(live)
	}

	fn attach(&self, view: Arc<dyn RootView>) -> Result<(), BridgeError> {
		let mut roots = self.roots.lock();
		if roots.iter().any(|root| same_view(&root.view, &view)) {
			return Ok(());
		}

		let mut root = AttachedRoot { view, tag: None };
		let mounted = match self.live() {
			Some(live) => self.mount(&mut root, &live.instance),
			None => Ok(()),
		};
		roots.push(root);
		mounted
	}

	fn detach(&self, view: &Arc<dyn RootView>) -> Result<(), BridgeError> {
		let mut root = {
			let mut roots = self.roots.lock();
			let Some(index) = roots.iter().position(|root| same_view(&root.view, view)) else {
				return Ok(());
			};
			roots.remove(index)
		};

		match self.live() {
			Some(live) => self.unmount(&mut root, &live.instance),
			None => Ok(()),
		}
	}

	fn invoke_default_back(&self) {
		let handler = self.default_back.lock().clone();
		match handler {
			Some(handler) => handler(),
			None => tracing::debug!("manager.no_default_back_handler"),
		}
	}
}

/// Everything [`crate::InstanceManagerBuilder`] hands over.
pub(crate) struct ManagerParts {
	pub dispatcher: MessageQueue,
	pub packages: Vec<Arc<dyn ModulePackage>>,
	pub executor_factory: ExecutorFactory,
	pub bundle_file: Option<PathBuf>,
	pub main_module_name: String,
	pub use_developer_support: bool,
	pub initial_lifecycle_state: LifecycleState,
	pub dev_support: Arc<dyn DevSupport>,
	pub root_host: Arc<dyn RootViewHost>,
	pub queue_options: QueueOptions,
	pub exception_handler: Option<ExceptionHandler>,
	pub fatal_handler: Option<ExceptionHandler>,
}

/// Owns the runtime context of one host.
///
/// Host events (`on_suspend`, `on_resume`, `on_back_pressed` and the background pair) must
/// be called on [`Self::dispatcher`].
pub struct InstanceManager {
	lock: tokio::sync::Mutex<CreationState>,
	shared: Arc<Shared>,
	dispatcher: MessageQueue,
	attempts: SupersedingCancellation,
	suspend: Mutex<CancellationToken>,
	packages: Vec<Arc<dyn ModulePackage>>,
	executor_factory: ExecutorFactory,
	bundle_file: Option<PathBuf>,
	main_module_name: String,
	use_developer_support: bool,
	queue_options: QueueOptions,
	exception_handler: Option<ExceptionHandler>,
	fatal_handler: Option<ExceptionHandler>,
	source_url: RwLock<Option<String>>,
}

impl std::fmt::Debug for InstanceManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InstanceManager")
			.field("dispatcher", &self.dispatcher)
			.field("packages", &self.packages.len())
			.field("bundle_file", &self.bundle_file)
			.field("main_module_name", &self.main_module_name)
			.field("use_developer_support", &self.use_developer_support)
			.field("has_context", &self.shared.live().is_some())
			.finish_non_exhaustive()
	}
}

fn checkpoint(attempt: &GenerationToken, caller: &CancellationToken) -> Result<(), BridgeError> {
	if attempt.is_cancelled() || caller.is_cancelled() {
		return Err(BridgeError::Cancelled);
	}
	Ok(())
}

/// Exception handler that routes through `context`'s policy without keeping it alive.
fn route_to(context: &Arc<RuntimeContext>) -> ExceptionHandler {
	let context = Arc::downgrade(context);
	Arc::new(move |err: BridgeError| match context.upgrade() {
		Some(context) => context.handle_exception(err),
		None => tracing::error!(error = %err, "manager.exception_after_drop"),
	})
}

impl InstanceManager {
	pub(crate) fn new(parts: ManagerParts) -> Self {
		let shared = Arc::new(Shared {
			current: ArcSwapOption::empty(),
			roots: Mutex::new(Vec::new()),
			lifecycle: Mutex::new(LifecycleStateMachine::new(parts.initial_lifecycle_state)),
			default_back: Mutex::new(None),
			last_fatal: Mutex::new(None),
			root_host: parts.root_host,
			dev_support: parts.dev_support,
		});

		Self {
			lock: tokio::sync::Mutex::new(CreationState::default()),
			shared,
			dispatcher: parts.dispatcher,
			attempts: SupersedingCancellation::new(),
			suspend: Mutex::new(CancellationToken::new()),
			packages: parts.packages,
			executor_factory: parts.executor_factory,
			bundle_file: parts.bundle_file,
			main_module_name: parts.main_module_name,
			use_developer_support: parts.use_developer_support,
			queue_options: parts.queue_options,
			exception_handler: parts.exception_handler,
			fatal_handler: parts.fatal_handler,
			source_url: RwLock::new(None),
		}
	}

	/// Queue host events must be delivered on.
	pub fn dispatcher(&self) -> &MessageQueue {
		&self.dispatcher
	}

	pub fn dev_support(&self) -> &Arc<dyn DevSupport> {
		&self.shared.dev_support
	}

	pub fn main_module_name(&self) -> &str {
		&self.main_module_name
	}

	/// Source URL of the bundle the latest attempt loaded.
	pub fn source_url(&self) -> Option<String> {
		self.source_url.read().clone()
	}

	pub fn lifecycle_state(&self) -> LifecycleState {
		self.shared.lifecycle.lock().state()
	}

	pub fn attached_root_count(&self) -> usize {
		self.shared.roots.lock().len()
	}

	/// Message of the latest error a context treated as fatal, whether or not a fatal
	/// handler was configured.
	pub fn last_fatal_error(&self) -> Option<String> {
		self.shared.last_fatal.lock().clone()
	}

	/// The context whose instance is live, if any.
	pub fn current_context(&self) -> Option<Arc<RuntimeContext>> {
		self.shared.live().map(|live| Arc::clone(&live.context))
	}

	/// Lock-free read of the current context; `None` while none is live.
	pub fn try_get_context(&self) -> Option<Arc<RuntimeContext>> {
		self.current_context()
	}

	/// The current context once creation has started.
	pub async fn get_context(&self) -> Result<Option<Arc<RuntimeContext>>, BridgeError> {
		let state = self.lock.lock().await;
		if !state.has_started_creating {
			return Err(BridgeError::NotYetCreated);
		}
		Ok(self.current_context())
	}

	/// Creates the first context.
	///
	/// Fails with [`BridgeError::AlreadyCreated`] once creation has started. Resolves to
	/// `None` when the attempt was superseded or the host suspended, and fails with
	/// [`BridgeError::Cancelled`] when `token` fired.
	pub async fn create_context(&self, token: CancellationToken) -> Result<Option<Arc<RuntimeContext>>, BridgeError> {
		let mut state = self.lock.lock().await;
		if state.has_started_creating {
			return Err(BridgeError::AlreadyCreated);
		}
		state.has_started_creating = true;
		let attempt = self.begin_attempt();
		self.create_context_core(attempt, &token).await
	}

	/// Replaces the current context with a fresh one.
	///
	/// Supersedes an attempt that is still running before waiting for the lock. Fails with
	/// [`BridgeError::NotYetCreated`] when creation never started.
	pub async fn recreate_context(&self, token: CancellationToken) -> Result<Option<Arc<RuntimeContext>>, BridgeError> {
		let attempt = self.begin_attempt();
		let state = self.lock.lock().await;
		if !state.has_started_creating {
			self.attempts.finish(attempt.generation());
			return Err(BridgeError::NotYetCreated);
		}
		self.create_context_core(attempt, &token).await
	}

	/// Returns the current context, creating the first one if creation never started.
	pub async fn get_or_create_context(&self, token: CancellationToken) -> Result<Option<Arc<RuntimeContext>>, BridgeError> {
		let mut state = self.lock.lock().await;
		if state.has_started_creating {
			return Ok(self.current_context());
		}
		state.has_started_creating = true;
		let attempt = self.begin_attempt();
		self.create_context_core(attempt, &token).await
	}

	fn begin_attempt(&self) -> GenerationToken {
		let suspend = self.suspend.lock().clone();
		self.attempts.begin_child_of(&suspend)
	}

	/// Cancels the attempt when the caller's token fires. Dropping the guard ends the link.
	fn link_caller(attempt: &GenerationToken, caller: &CancellationToken) -> DropGuard {
		let done = CancellationToken::new();
		let (attempt, caller, finished) = (attempt.token().clone(), caller.clone(), done.clone());
		trellis_worker::spawn(QueueRole::Dispatcher, async move {
			tokio::select! {
				_ = caller.cancelled() => attempt.cancel(),
				_ = finished.cancelled() => {}
			}
		});
		done.drop_guard()
	}

	/// Runs one attempt. Must be called with the lock held.
	async fn create_context_core(&self, attempt: GenerationToken, caller: &CancellationToken) -> Result<Option<Arc<RuntimeContext>>, BridgeError> {
		let generation = attempt.generation();
		let _link = Self::link_caller(&attempt, caller);
		let span = tracing::info_span!("manager.create_context", generation);
		let result = self.initialize_context(&attempt, caller).instrument(span).await;
		self.attempts.finish(generation);

		match result {
			Ok(context) => Ok(Some(context)),
			Err(BridgeError::Cancelled) if caller.is_cancelled() => {
				tracing::debug!(generation, "manager.create_cancelled");
				Err(BridgeError::Cancelled)
			}
			Err(BridgeError::Cancelled) => {
				tracing::debug!(generation, "manager.create_superseded");
				Ok(None)
			}
			Err(err) => self.report_startup_failure(err),
		}
	}

	fn report_startup_failure(&self, err: BridgeError) -> Result<Option<Arc<RuntimeContext>>, BridgeError> {
		tracing::error!(error = %err, developer_support = self.use_developer_support, "manager.startup_failed");
		if self.use_developer_support {
			self.shared.dev_support.handle_exception(err);
			return Ok(None);
		}
		match err {
			BridgeError::Fatal(_) => Err(err),
			err => Err(BridgeError::Fatal(err.to_string())),
		}
	}

	async fn initialize_context(&self, attempt: &GenerationToken, caller: &CancellationToken) -> Result<Arc<RuntimeContext>, BridgeError> {
		checkpoint(attempt, caller)?;
		self.tear_down_current().await?;
		checkpoint(attempt, caller)?;

		let live = if self.use_developer_support && self.bundle_file.is_none() {
			self.create_context_from_packager(attempt, caller).await?
		} else {
			self.create_context_from_bundle(attempt, caller).await?
		};

		let (context, instance) = (Arc::clone(&live.context), live.instance.clone());
		let shared = Arc::clone(&self.shared);
		if let Err(err) = self.dispatcher.run_sync(move || shared.install(Arc::new(live))).await {
			context.dispose().await;
			instance.dispose().await;
			return Err(err.into());
		}
		Ok(context)
	}

	/// Takes the current context off the host and disposes it.
	async fn tear_down_current(&self) -> Result<(), BridgeError> {
		let shared = Arc::clone(&self.shared);
		let Some(live) = self.dispatcher.run_sync(move || shared.clear()).await? else {
			return Ok(());
		};
		tracing::debug!(source_url = live.instance.source_url(), "manager.tear_down");
		live.context.dispose().await;
		self.shared.dev_support.on_context_destroyed(&live.context);
		Ok(())
	}

	async fn create_context_from_packager(&self, attempt: &GenerationToken, caller: &CancellationToken) -> Result<LiveContext, BridgeError> {
		let dev_support = &self.shared.dev_support;
		let loader = match dev_support.cached_bundle_loader() {
			Some(loader) if dev_support.has_cached_bundle() => {
				tracing::debug!(source_url = loader.source_url(), "manager.cached_bundle");
				loader
			}
			_ => dev_support.packager_bundle_loader(attempt.token().clone()).await?,
		};
		checkpoint(attempt, caller)?;
		self.create_context_with(loader, attempt, caller).await
	}

	async fn create_context_from_bundle(&self, attempt: &GenerationToken, caller: &CancellationToken) -> Result<LiveContext, BridgeError> {
		let Some(path) = &self.bundle_file else {
			return Err(BridgeError::Fatal("no bundle file is configured and developer support is off".to_string()));
		};
		self.create_context_with(Arc::new(FileBundleLoader::new(path)), attempt, caller).await
	}

	async fn create_context_with(&self, loader: Arc<dyn BundleLoader>, attempt: &GenerationToken, caller: &CancellationToken) -> Result<LiveContext, BridgeError> {
		*self.source_url.write() = Some(loader.source_url().to_string());

		let context = Arc::new(RuntimeContext::new());
		self.install_exception_policy(&context);
		let exceptions = route_to(&context);
		let registry = self.build_registry(&context, &exceptions)?;
		checkpoint(attempt, caller)?;

		let on_error = Arc::clone(&exceptions);
		let queues = QueueConfiguration::create(&self.dispatcher, &self.queue_options, Arc::new(move |err: QueueError| on_error(err.into())))
			.map_err(|source| BridgeError::QueueSpawn {
				queue: "instance".to_string(),
				source,
			})?;
		let instance = RuntimeInstance::new(InstanceParts {
			queues: Arc::new(queues),
			registry: Arc::new(registry),
			executor_factory: Arc::clone(&self.executor_factory),
			bundle_loader: loader,
			exceptions,
		});

		let live = LiveContext { context, instance };
		if let Err(err) = Self::start(&live, attempt, caller).await {
			live.context.dispose().await;
			live.instance.dispose().await;
			return Err(err);
		}
		Ok(live)
	}

	async fn start(live: &LiveContext, attempt: &GenerationToken, caller: &CancellationToken) -> Result<(), BridgeError> {
		live.context.initialize_with_instance(&live.instance)?;
		live.instance.initialize().await?;
		checkpoint(attempt, caller)?;
		live.instance.initialize_bridge().await?;
		checkpoint(attempt, caller)
	}

	/// Module failures go to the configured handler, or to dev support when it is on.
	/// Anything else is fatal.
	fn install_exception_policy(&self, context: &RuntimeContext) {
		let handler: Option<ExceptionHandler> = match (&self.exception_handler, self.use_developer_support) {
			(Some(handler), _) => Some(Arc::clone(handler)),
			(None, true) => {
				let dev_support = Arc::clone(&self.shared.dev_support);
				Some(Arc::new(move |err: BridgeError| dev_support.handle_exception(err)))
			}
			(None, false) => None,
		};
		context.set_exception_handler(handler);
		context.set_fatal_handler(Some(self.fatal_sink()));
	}

	/// Records the error on the manager, then forwards it to the configured fatal handler.
	fn fatal_sink(&self) -> ExceptionHandler {
		let shared = Arc::downgrade(&self.shared);
		let forward = self.fatal_handler.clone();
		Arc::new(move |err: BridgeError| {
			if let Some(shared) = shared.upgrade() {
				*shared.last_fatal.lock() = Some(err.to_string());
			}
			if let Some(forward) = &forward {
				forward(err);
			}
		})
	}

	fn default_back_handler(&self) -> BackHandler {
		let shared = Arc::downgrade(&self.shared);
		Arc::new(move || {
			if let Some(shared) = shared.upgrade() {
				shared.invoke_default_back();
			}
		})
	}

	/// Core modules first, then each package in order.
	fn build_registry(&self, context: &Arc<RuntimeContext>, exceptions: &ExceptionHandler) -> Result<NativeModuleRegistry, BridgeError> {
		let mut holders = CoreModulesPackage::new(self.default_back_handler()).create_native_modules(context);
		for package in &self.packages {
			holders.extend(package.create_native_modules(context));
		}

		let mut builder = NativeModuleRegistryBuilder::new(Arc::clone(exceptions)).queue_options(self.queue_options.clone());
		for holder in holders {
			builder.add_holder(Some(holder))?;
		}
		builder.build()
	}

	/// Module metadata a new context would publish, built against a detached context.
	pub fn module_config(&self) -> Result<Value, BridgeError> {
		let context = Arc::new(RuntimeContext::new());
		let registry = self.build_registry(&context, &route_to(&context))?;
		Ok(registry.module_config())
	}

	/// Attaches `view` and, when a context is live, mounts it right away. Attaching a view
	/// twice is a no-op.
	pub async fn attach_root_view(&self, view: Arc<dyn RootView>) -> Result<(), BridgeError> {
		let shared = Arc::clone(&self.shared);
		self.dispatcher.run_sync(move || shared.attach(view)).await?
	}

	/// Detaches `view`. Unknown views are ignored.
	pub async fn detach_root_view(&self, view: &Arc<dyn RootView>) -> Result<(), BridgeError> {
		let shared = Arc::clone(&self.shared);
		let view = Arc::clone(view);
		self.dispatcher.run_sync(move || shared.detach(&view)).await?
	}

	/// Host went to the background: cancels in-flight creation and forwards `suspend`.
	pub fn on_suspend(&self) -> Result<(), BridgeError> {
		self.dispatcher.assert_on_thread()?;
		*self.shared.default_back.lock() = None;
		self.suspend.lock().cancel();
		if self.use_developer_support {
			self.shared.dev_support.set_enabled(false);
		}
		self.shared.lifecycle.lock().on_suspend()
	}

	/// Host came to the foreground. `default_back` runs when the script side declines a back
	/// press.
	pub fn on_resume(&self, default_back: BackHandler) -> Result<(), BridgeError> {
		self.dispatcher.assert_on_thread()?;
		*self.shared.default_back.lock() = Some(default_back);
		{
			let mut suspend = self.suspend.lock();
			if suspend.is_cancelled() {
				*suspend = CancellationToken::new();
			}
		}
		if self.use_developer_support {
			self.shared.dev_support.set_enabled(true);
		}
		self.shared.lifecycle.lock().on_resume()
	}

	pub fn on_entered_background(&self) -> Result<(), BridgeError> {
		self.dispatcher.assert_on_thread()?;
		self.shared.lifecycle.lock().on_entered_background()
	}

	pub fn on_leaving_background(&self) -> Result<(), BridgeError> {
		self.dispatcher.assert_on_thread()?;
		self.shared.lifecycle.lock().on_leaving_background()
	}

	/// Offers the back press to the script side, or runs the default handler when no
	/// context is live.
	pub fn on_back_pressed(&self) -> Result<(), BridgeError> {
		self.dispatcher.assert_on_thread()?;
		match self.shared.live() {
			Some(live) => {
				tracing::trace!("manager.back_pressed");
				DeviceEventEmitter::new(&live.instance).emit(HARDWARE_BACK_PRESS, Value::Null)
			}
			None => {
				self.shared.invoke_default_back();
				Ok(())
			}
		}
	}

	/// Destroys the current context and resets creation so `create_context` may run again.
	/// Attached roots stay attached and mount into the next context.
	///
	/// An attempt still in flight is cancelled before waiting for the lock, so it unwinds
	/// at its next checkpoint.
	pub async fn dispose(&self) {
		self.attempts.cancel_current();
		let mut state = self.lock.lock().await;
		if self.use_developer_support {
			self.shared.dev_support.set_enabled(false);
		}

		let shared = Arc::clone(&self.shared);
		let cleared = self
			.dispatcher
			.run_sync(move || {
				let destroyed = shared.lifecycle.lock().on_destroy();
				(destroyed, shared.clear())
			})
			.await;

		match cleared {
			Ok((destroyed, live)) => {
				if let Err(err) = destroyed {
					tracing::warn!(error = %err, "manager.destroy_failed");
				}
				if let Some(live) = live {
					live.context.dispose().await;
					self.shared.dev_support.on_context_destroyed(&live.context);
				}
			}
			Err(err) => tracing::warn!(error = %err, "manager.dispose_failed"),
		}

		state.has_started_creating = false;
		tracing::debug!("manager.disposed");
	}
}
