use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

use crate::QueueRole;

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(1)
			.thread_name("trellis-worker-global")
			.build()
			.expect("failed to build trellis-worker global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task on the ambient runtime, falling back to a shared global runtime
/// when called from a queue thread.
pub fn spawn<F>(role: QueueRole, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(queue_role = role.as_str(), "worker.spawn");
	runtime_handle().spawn(fut)
}

/// Spawns a dedicated named OS thread tagged with the queue role it serves.
pub fn spawn_named_thread<F, R>(role: QueueRole, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let name = name.into();
	tracing::trace!(queue_role = role.as_str(), thread = %name, "worker.spawn_named_thread");
	std::thread::Builder::new().name(name).spawn(f)
}
