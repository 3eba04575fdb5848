use std::path::PathBuf;
use std::sync::Arc;

use trellis_bridge::{ExceptionHandler, ExecutorFactory};
use trellis_worker::{MessageQueue, QueueError, QueueOptions, QueueRole};

use crate::manager::ManagerParts;
use crate::{DevSupport, DisabledDevSupport, HostConfig, HostError, InstanceManager, LifecycleState, ModulePackage, RootTagAllocator, RootViewHost};

/// Assembles an [`InstanceManager`].
///
/// Only the executor factory is required. Without a root view host, tags come from a
/// [`RootTagAllocator`]; without dev support, [`DisabledDevSupport`] is used.
#[derive(Default)]
pub struct InstanceManagerBuilder {
	packages: Vec<Arc<dyn ModulePackage>>,
	bundle_file: Option<PathBuf>,
	main_module_name: Option<String>,
	use_developer_support: bool,
	initial_lifecycle_state: LifecycleState,
	executor_factory: Option<ExecutorFactory>,
	dev_support: Option<Arc<dyn DevSupport>>,
	root_view_host: Option<Arc<dyn RootViewHost>>,
	queue_options: QueueOptions,
	exception_handler: Option<ExceptionHandler>,
	fatal_handler: Option<ExceptionHandler>,
}

impl InstanceManagerBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seeds the builder from a loaded [`HostConfig`].
	pub fn from_config(config: &HostConfig) -> Self {
		Self {
			bundle_file: config.bundle_file.clone(),
			main_module_name: Some(config.main_module_name.clone()),
			use_developer_support: config.use_developer_support,
			initial_lifecycle_state: config.initial_lifecycle_state,
			queue_options: config.queue_options(),
			..Self::default()
		}
	}

	pub fn package(mut self, package: impl ModulePackage + 'static) -> Self {
		self.packages.push(Arc::new(package));
		self
	}

	pub fn bundle_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.bundle_file = Some(path.into());
		self
	}

	pub fn main_module_name(mut self, name: impl Into<String>) -> Self {
		self.main_module_name = Some(name.into());
		self
	}

	pub fn use_developer_support(mut self, enabled: bool) -> Self {
		self.use_developer_support = enabled;
		self
	}

	pub fn initial_lifecycle_state(mut self, state: LifecycleState) -> Self {
		self.initial_lifecycle_state = state;
		self
	}

	pub fn executor_factory(mut self, factory: ExecutorFactory) -> Self {
		self.executor_factory = Some(factory);
		self
	}

	pub fn dev_support(mut self, dev_support: Arc<dyn DevSupport>) -> Self {
		self.dev_support = Some(dev_support);
		self
	}

	pub fn root_view_host(mut self, host: Arc<dyn RootViewHost>) -> Self {
		self.root_view_host = Some(host);
		self
	}

	pub fn queue_options(mut self, options: QueueOptions) -> Self {
		self.queue_options = options;
		self
	}

	/// Handler for module failures while a context is live.
	pub fn exception_handler(mut self, handler: ExceptionHandler) -> Self {
		self.exception_handler = Some(handler);
		self
	}

	/// Sink for fatal errors, including dispatcher queue panics.
	pub fn fatal_handler(mut self, handler: ExceptionHandler) -> Self {
		self.fatal_handler = Some(handler);
		self
	}

	/// Spawns the dispatcher queue and builds the manager.
	pub fn build(self) -> Result<InstanceManager, HostError> {
		let executor_factory = self.executor_factory.ok_or(HostError::MissingExecutor)?;

		let fatal = self.fatal_handler.clone();
		let on_error = Arc::new(move |err: QueueError| match &fatal {
			Some(fatal) => fatal(err.into()),
			None => tracing::error!(error = %err, "manager.dispatcher_error"),
		});
		let dispatcher = MessageQueue::spawn(self.queue_options.spec("dispatcher", QueueRole::Dispatcher), on_error).map_err(HostError::Dispatcher)?;

		tracing::debug!(
			packages = self.packages.len(),
			bundle_file = ?self.bundle_file,
			developer_support = self.use_developer_support,
			"manager.build"
		);
		Ok(InstanceManager::new(ManagerParts {
			dispatcher,
			packages: self.packages,
			executor_factory,
			bundle_file: self.bundle_file,
			main_module_name: self.main_module_name.unwrap_or_else(|| HostConfig::default().main_module_name),
			use_developer_support: self.use_developer_support,
			initial_lifecycle_state: self.initial_lifecycle_state,
			dev_support: self.dev_support.unwrap_or_else(|| Arc::new(DisabledDevSupport)),
			root_host: self.root_view_host.unwrap_or_else(|| Arc::new(RootTagAllocator::new())),
			queue_options: self.queue_options,
			exception_handler: self.exception_handler,
			fatal_handler: self.fatal_handler,
		}))
	}
}
