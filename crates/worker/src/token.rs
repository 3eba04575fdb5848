use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// Monotonic generation clock for context creation attempts.
#[derive(Debug, Default, Clone)]
pub struct GenerationClock {
	next: Arc<AtomicU64>,
}

impl GenerationClock {
	/// Creates a new generation clock starting at generation 1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next generation ID.
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}
}

/// Generation-scoped cancellation token for one creation attempt.
#[derive(Debug, Clone)]
pub struct GenerationToken {
	generation: u64,
	cancel: CancellationToken,
}

impl GenerationToken {
	/// Creates a new generation token.
	pub fn new(generation: u64, cancel: CancellationToken) -> Self {
		Self { generation, cancel }
	}

	/// Returns generation ID.
	pub const fn generation(&self) -> u64 {
		self.generation
	}

	/// Returns true when cancellation is requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Future resolving when cancellation is requested.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	/// Underlying cancellation token.
	pub fn token(&self) -> &CancellationToken {
		&self.cancel
	}
}

/// Single-slot cancellation holder where beginning a new attempt cancels the previous one.
///
/// At most one attempt is current. A superseded attempt observes cancellation at its next
/// checkpoint and is expected to unwind without publishing results.
#[derive(Debug, Default)]
pub struct SupersedingCancellation {
	clock: GenerationClock,
	current: Mutex<Option<GenerationToken>>,
}

impl SupersedingCancellation {
	pub fn new() -> Self {
		Self::default()
	}

	/// Begins a new attempt, cancelling whichever attempt was current.
	pub fn begin(&self) -> GenerationToken {
		self.install(CancellationToken::new())
	}

	/// Begins a new attempt whose token is also cancelled when `parent` is.
	pub fn begin_child_of(&self, parent: &CancellationToken) -> GenerationToken {
		self.install(parent.child_token())
	}

	fn install(&self, cancel: CancellationToken) -> GenerationToken {
		let token = GenerationToken::new(self.clock.next(), cancel);
		let previous = self.current.lock().unwrap_or_else(PoisonError::into_inner).replace(token.clone());
		if let Some(previous) = previous {
			tracing::debug!(superseded = previous.generation(), generation = token.generation(), "cancellation.superseded");
			previous.cancel();
		}
		token
	}

	/// Releases the slot if `generation` is still the current attempt.
	pub fn finish(&self, generation: u64) {
		let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
		if current.as_ref().is_some_and(|token| token.generation() == generation) {
			*current = None;
		}
	}

	/// Cancels the current attempt, if any, and empties the slot.
	pub fn cancel_current(&self) {
		if let Some(token) = self.current.lock().unwrap_or_else(PoisonError::into_inner).take() {
			token.cancel();
		}
	}

	/// Generation of the attempt currently holding the slot.
	pub fn current_generation(&self) -> Option<u64> {
		self.current.lock().unwrap_or_else(PoisonError::into_inner).as_ref().map(GenerationToken::generation)
	}
}
