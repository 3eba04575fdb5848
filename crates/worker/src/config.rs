use std::time::Duration;

use crate::queue::DEFAULT_SHUTDOWN_ACK_TIMEOUT;
use crate::{MessageQueue, QueueErrorHandler, QueueRecord, QueueRegistry, QueueRole, QueueSpec};

/// Tunables applied to the queues a [`QueueConfiguration`] spawns.
#[derive(Debug, Clone)]
pub struct QueueOptions {
	pub shutdown_ack_timeout: Duration,
}

impl Default for QueueOptions {
	fn default() -> Self {
		Self {
			shutdown_ack_timeout: DEFAULT_SHUTDOWN_ACK_TIMEOUT,
		}
	}
}

impl QueueOptions {
	/// Builds the spec for a queue spawned under these options.
	pub fn spec(&self, name: impl Into<String>, role: QueueRole) -> QueueSpec {
		QueueSpec::new(name, role).shutdown_ack_timeout(self.shutdown_ack_timeout)
	}
}

/// The three execution domains of one runtime instance.
///
/// The dispatcher queue belongs to the host and is only borrowed here as a client handle.
/// The native-modules and script queues are spawned per instance and closed by
/// [`Self::dispose`]. Immutable after creation; share it behind an `Arc`.
#[derive(Debug)]
pub struct QueueConfiguration {
	dispatcher: MessageQueue,
	native_modules: MessageQueue,
	script: MessageQueue,
	registry: QueueRegistry,
}

impl QueueConfiguration {
	/// Spawns the per-instance queues. `on_error` receives panics from any of them.
	pub fn create(dispatcher: &MessageQueue, options: &QueueOptions, on_error: QueueErrorHandler) -> std::io::Result<Self> {
		let native_modules = MessageQueue::spawn(options.spec("native_modules", QueueRole::NativeModules), on_error.clone())?;
		let script = MessageQueue::spawn(options.spec("script", QueueRole::Script), on_error)?;

		let registry = QueueRegistry::new();
		let dispatcher = dispatcher.client();
		for queue in [&dispatcher, &native_modules, &script] {
			registry.register(queue);
		}

		Ok(Self {
			dispatcher,
			native_modules,
			script,
			registry,
		})
	}

	pub fn dispatcher(&self) -> &MessageQueue {
		&self.dispatcher
	}

	pub fn native_modules(&self) -> &MessageQueue {
		&self.native_modules
	}

	pub fn script(&self) -> &MessageQueue {
		&self.script
	}

	/// Queue serving `role`. Dedicated module queues are not part of the triple.
	pub fn queue(&self, role: QueueRole) -> Option<&MessageQueue> {
		match role {
			QueueRole::Dispatcher => Some(&self.dispatcher),
			QueueRole::NativeModules => Some(&self.native_modules),
			QueueRole::Script => Some(&self.script),
			QueueRole::Module => None,
		}
	}

	/// Registry tracking these queues and any extra queues registered by the instance.
	pub fn registry(&self) -> &QueueRegistry {
		&self.registry
	}

	pub fn snapshots(&self) -> Vec<QueueRecord> {
		self.registry.snapshots()
	}

	/// Closes the per-instance queues after their pending work drains. The dispatcher is
	/// left running. Idempotent.
	pub fn dispose(&self) {
		self.native_modules.close();
		self.script.close();
	}
}
