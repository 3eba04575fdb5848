//! Dedicated-thread FIFO message queues.
//!
//! Each [`MessageQueue`] owns one named OS thread that runs submitted actions strictly in
//! submission order, one at a time. Callers may test or assert thread affinity and may run
//! a closure "synchronously" on the queue: inline when already on the queue thread,
//! otherwise enqueued with the result delivered through a oneshot.
//!
//! Handles follow owner/client semantics. The handle returned by [`MessageQueue::spawn`]
//! is the owner and shuts the thread down on [`MessageQueue::close`] or drop. Handles from
//! [`MessageQueue::client`] share the channel and closed flag but never shut the queue
//! down. Shutdown is itself a queued job, so work submitted before closing still drains.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, mpsc};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::{QueueRole, panic_message, spawn_named_thread};

/// Default time an owner waits on drop for the queue thread to acknowledge shutdown.
pub const DEFAULT_SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_millis(100);

type Action = Box<dyn FnOnce() + Send + 'static>;

/// Receives failures raised by actions running on a queue.
pub type QueueErrorHandler = Arc<dyn Fn(QueueError) + Send + Sync>;

enum Job {
	Run { action: Action, span: tracing::Span },
	Shutdown { ack: Option<oneshot::Sender<()>> },
}

/// Failures surfaced by [`MessageQueue`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
	/// The queue was closed and no longer accepts work.
	#[error("queue '{queue}' is closed")]
	Closed { queue: String },
	/// A thread-affinity assertion failed.
	#[error("expected to run on queue '{queue}', running on thread {current}")]
	WrongThread { queue: String, current: String },
	/// An action panicked while running on the queue.
	#[error("action on queue '{queue}' panicked: {message}")]
	Panicked { queue: String, message: String },
	/// The queue went away before replying.
	#[error("queue '{queue}' dropped the reply")]
	Dropped { queue: String },
}

/// Construction parameters for a [`MessageQueue`].
#[derive(Debug, Clone)]
pub struct QueueSpec {
	pub name: String,
	pub role: QueueRole,
	pub shutdown_ack_timeout: Duration,
}

impl QueueSpec {
	pub fn new(name: impl Into<String>, role: QueueRole) -> Self {
		Self {
			name: name.into(),
			role,
			shutdown_ack_timeout: DEFAULT_SHUTDOWN_ACK_TIMEOUT,
		}
	}

	/// Overrides how long an owner waits for the shutdown ack on drop.
	pub fn shutdown_ack_timeout(mut self, timeout: Duration) -> Self {
		self.shutdown_ack_timeout = timeout;
		self
	}
}

#[derive(Debug)]
pub(crate) struct QueueShared {
	pub(crate) name: Arc<str>,
	pub(crate) role: QueueRole,
	thread_id: OnceLock<ThreadId>,
	pub(crate) closed: AtomicBool,
	pub(crate) pending: AtomicUsize,
	/// Dispatches hold it shared across the closed check and the send; shutdown holds it
	/// exclusively, so no job can be enqueued behind the shutdown job.
	gate: RwLock<()>,
}

/// Handle to a dedicated-thread FIFO queue.
pub struct MessageQueue {
	tx: mpsc::Sender<Job>,
	shared: Arc<QueueShared>,
	/// Only the owner shuts the thread down.
	is_owner: bool,
	shutdown_ack_timeout: Duration,
}

impl std::fmt::Debug for MessageQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MessageQueue")
			.field("name", &self.shared.name)
			.field("role", &self.shared.role)
			.field("is_owner", &self.is_owner)
			.field("closed", &self.is_closed())
			.finish()
	}
}

impl MessageQueue {
	/// Spawns the queue thread. Panics inside dispatched actions are reported to `on_error`
	/// and do not stop the queue.
	pub fn spawn(spec: QueueSpec, on_error: QueueErrorHandler) -> std::io::Result<Self> {
		let (tx, rx) = mpsc::channel::<Job>();
		let shared = Arc::new(QueueShared {
			name: Arc::from(spec.name.as_str()),
			role: spec.role,
			thread_id: OnceLock::new(),
			closed: AtomicBool::new(false),
			pending: AtomicUsize::new(0),
			gate: RwLock::new(()),
		});

		let worker = Arc::clone(&shared);
		let handle = spawn_named_thread(spec.role, spec.name.clone(), move || run_queue(&worker, &rx, &on_error))?;
		let _ = shared.thread_id.set(handle.thread().id());

		tracing::debug!(queue = %shared.name, role = shared.role.as_str(), "queue.spawned");
		Ok(Self {
			tx,
			shared,
			is_owner: true,
			shutdown_ack_timeout: spec.shutdown_ack_timeout,
		})
	}

	/// Creates a non-owning client handle sharing the same queue.
	pub fn client(&self) -> Self {
		Self {
			tx: self.tx.clone(),
			shared: Arc::clone(&self.shared),
			is_owner: false,
			shutdown_ack_timeout: self.shutdown_ack_timeout,
		}
	}

	pub fn name(&self) -> &str {
		&self.shared.name
	}

	pub fn role(&self) -> QueueRole {
		self.shared.role
	}

	pub fn is_owner(&self) -> bool {
		self.is_owner
	}

	pub fn is_closed(&self) -> bool {
		self.shared.closed.load(Ordering::Acquire)
	}

	/// Number of dispatched actions not yet started.
	pub fn pending(&self) -> usize {
		self.shared.pending.load(Ordering::Acquire)
	}

	/// Whether the calling thread is this queue's thread.
	pub fn is_on_thread(&self) -> bool {
		self.shared.thread_id.get().is_some_and(|id| *id == thread::current().id())
	}

	/// Fails with [`QueueError::WrongThread`] unless called on this queue's thread.
	pub fn assert_on_thread(&self) -> Result<(), QueueError> {
		if self.is_on_thread() {
			return Ok(());
		}
		let current = thread::current();
		Err(QueueError::WrongThread {
			queue: self.name().to_string(),
			current: current.name().map_or_else(|| format!("{:?}", current.id()), str::to_string),
		})
	}

	/// Enqueues `action` without blocking.
	pub fn dispatch<F>(&self, action: F) -> Result<(), QueueError>
	where
		F: FnOnce() + Send + 'static,
	{
		let sent = {
			let _gate = self.shared.gate.read().unwrap_or_else(PoisonError::into_inner);
			if self.is_closed() {
				return Err(self.closed_error());
			}
			self.shared.pending.fetch_add(1, Ordering::AcqRel);
			self.tx.send(Job::Run {
				action: Box::new(action),
				span: tracing::Span::current(),
			})
		};
		// A rejected job is dropped only after the gate is released.
		if sent.is_err() {
			self.shared.pending.fetch_sub(1, Ordering::AcqRel);
			return Err(self.closed_error());
		}
		tracing::trace!(queue = %self.shared.name, "queue.dispatch");
		Ok(())
	}

	/// Runs `f` on the queue and resolves with its result.
	///
	/// Runs inline when already on the queue thread. Otherwise the work is enqueued before
	/// this method returns, so dropping the future does not cancel it. A panic in `f` is
	/// returned to the caller as [`QueueError::Panicked`].
	pub fn run_sync<F, R>(&self, f: F) -> impl Future<Output = Result<R, QueueError>> + Send + use<F, R>
	where
		F: FnOnce() -> R + Send + 'static,
		R: Send + 'static,
	{
		let name = Arc::clone(&self.shared.name);
		let outcome = if self.is_on_thread() {
			Outcome::Ready(run_caught(&name, f))
		} else {
			let (reply_tx, reply_rx) = oneshot::channel();
			let job_name = Arc::clone(&name);
			match self.dispatch(move || {
				let _ = reply_tx.send(run_caught(&job_name, f));
			}) {
				Ok(()) => Outcome::Waiting(reply_rx),
				Err(err) => Outcome::Ready(Err(err)),
			}
		};

		async move {
			match outcome {
				Outcome::Ready(result) => result,
				Outcome::Waiting(reply) => reply.await.unwrap_or_else(|_| Err(QueueError::Dropped { queue: name.to_string() })),
			}
		}
	}

	/// Blocking counterpart of [`Self::run_sync`] for callers that may block their thread.
	///
	/// Must not be called from inside an async task.
	pub fn run_blocking<F, R>(&self, f: F) -> Result<R, QueueError>
	where
		F: FnOnce() -> R + Send + 'static,
		R: Send + 'static,
	{
		if self.is_on_thread() {
			return run_caught(&self.shared.name, f);
		}

		let (reply_tx, reply_rx) = mpsc::sync_channel(1);
		let name = Arc::clone(&self.shared.name);
		self.dispatch(move || {
			let _ = reply_tx.send(run_caught(&name, f));
		})?;
		reply_rx.recv().unwrap_or_else(|_| Err(QueueError::Dropped { queue: self.name().to_string() }))
	}

	/// Stops accepting work and asks the thread to exit once pending actions drain.
	///
	/// Idempotent. Client handles cannot close the queue.
	pub fn close(&self) {
		if self.is_owner && self.shut_down(None) {
			tracing::debug!(queue = %self.shared.name, pending = self.pending(), "queue.close");
		}
	}

	/// Marks the queue closed and enqueues the shutdown job behind every accepted dispatch.
	/// Returns false when the queue was already closed or its thread is gone.
	fn shut_down(&self, ack: Option<oneshot::Sender<()>>) -> bool {
		let _gate = self.shared.gate.write().unwrap_or_else(PoisonError::into_inner);
		if self.shared.closed.swap(true, Ordering::AcqRel) {
			return false;
		}
		self.tx.send(Job::Shutdown { ack }).is_ok()
	}

	pub(crate) fn shared(&self) -> &Arc<QueueShared> {
		&self.shared
	}

	fn closed_error(&self) -> QueueError {
		QueueError::Closed {
			queue: self.name().to_string(),
		}
	}
}

impl Drop for MessageQueue {
	fn drop(&mut self) {
		if !self.is_owner {
			return;
		}

		let (ack_tx, mut ack_rx) = oneshot::channel();
		if !self.shut_down(Some(ack_tx)) {
			return;
		}
		// The thread cannot ack while it is running this drop.
		if self.is_on_thread() {
			return;
		}

		let deadline = Instant::now() + self.shutdown_ack_timeout;
		loop {
			match ack_rx.try_recv() {
				Ok(()) => return,
				Err(TryRecvError::Empty) => {
					if Instant::now() >= deadline {
						tracing::debug!(queue = %self.shared.name, "queue.shutdown_ack_timeout");
						return;
					}
					thread::yield_now();
				}
				Err(TryRecvError::Closed) => return,
			}
		}
	}
}

enum Outcome<R> {
	Ready(Result<R, QueueError>),
	Waiting(oneshot::Receiver<Result<R, QueueError>>),
}

fn run_caught<F, R>(queue: &str, f: F) -> Result<R, QueueError>
where
	F: FnOnce() -> R,
{
	std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| QueueError::Panicked {
		queue: queue.to_string(),
		message: payload_message(payload.as_ref()),
	})
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
	panic_message(payload).unwrap_or_else(|| "non-string panic payload".to_string())
}

fn run_queue(shared: &QueueShared, rx: &mpsc::Receiver<Job>, on_error: &QueueErrorHandler) {
	while let Ok(job) = rx.recv() {
		match job {
			Job::Run { action, span } => {
				shared.pending.fetch_sub(1, Ordering::AcqRel);
				let _guard = span.enter();
				if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(action)) {
					let message = payload_message(payload.as_ref());
					tracing::error!(queue = %shared.name, %message, "queue.action_panicked");
					on_error(QueueError::Panicked {
						queue: shared.name.to_string(),
						message,
					});
				}
			}
			Job::Shutdown { ack } => {
				if let Some(ack) = ack {
					let _ = ack.send(());
				}
				break;
			}
		}
	}
	tracing::debug!(queue = %shared.name, "queue.exited");
}
