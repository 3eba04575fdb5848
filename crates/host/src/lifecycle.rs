use std::sync::Arc;

use serde::Deserialize;
use trellis_bridge::{BridgeError, RuntimeContext};

/// Host lifecycle position tracked independently of any context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
	/// Not yet resumed, or destroyed.
	#[default]
	BeforeCreate,
	Suspended,
	Resumed,
}

/// Forwards host lifecycle transitions to the current context.
///
/// The state changes even when there is no context. A context installed later is caught up
/// to the current state. Every method must run on the dispatcher queue whenever a context
/// is installed, because the context asserts it.
#[derive(Debug, Default)]
pub struct LifecycleStateMachine {
	state: LifecycleState,
	background: bool,
	context: Option<Arc<RuntimeContext>>,
}

impl LifecycleStateMachine {
	pub fn new(initial: LifecycleState) -> Self {
		Self {
			state: initial,
			..Self::default()
		}
	}

	pub fn state(&self) -> LifecycleState {
		self.state
	}

	pub fn is_in_background(&self) -> bool {
		self.background
	}

	pub fn context(&self) -> Option<&Arc<RuntimeContext>> {
		self.context.as_ref()
	}

	/// Installs `context` and catches it up: it receives `resume` when the host is resumed
	/// and `entered_background` when the host is in the background.
	pub fn set_context(&mut self, context: Arc<RuntimeContext>) -> Result<(), BridgeError> {
		tracing::trace!(state = ?self.state, background = self.background, "lifecycle.catch_up");
		let mut result = Ok(());
		if self.state == LifecycleState::Resumed {
			result = context.on_resume();
		}
		if self.background {
			result = result.and(context.on_entered_background());
		}
		self.context = Some(context);
		result
	}

	/// Drops the context without notifying it.
	pub fn clear_context(&mut self) -> Option<Arc<RuntimeContext>> {
		self.context.take()
	}

	pub fn on_resume(&mut self) -> Result<(), BridgeError> {
		let result = match (&self.context, self.state) {
			(Some(context), LifecycleState::BeforeCreate | LifecycleState::Suspended) => context.on_resume(),
			_ => Ok(()),
		};
		self.transition(LifecycleState::Resumed);
		result
	}

	pub fn on_suspend(&mut self) -> Result<(), BridgeError> {
		let result = match (&self.context, self.state) {
			(Some(context), LifecycleState::Resumed) => context.on_suspend(),
			_ => Ok(()),
		};
		self.transition(LifecycleState::Suspended);
		result
	}

	/// Suspends first when resumed, then destroys.
	pub fn on_destroy(&mut self) -> Result<(), BridgeError> {
		let mut result = Ok(());
		if let Some(context) = &self.context {
			if self.state == LifecycleState::Resumed {
				result = context.on_suspend();
			}
			if self.state != LifecycleState::BeforeCreate {
				result = result.and(context.on_destroy());
			}
		}
		self.transition(LifecycleState::BeforeCreate);
		result
	}

	pub fn on_entered_background(&mut self) -> Result<(), BridgeError> {
		let result = match &self.context {
			Some(context) if !self.background => context.on_entered_background(),
			_ => Ok(()),
		};
		self.background = true;
		result
	}

	pub fn on_leaving_background(&mut self) -> Result<(), BridgeError> {
		let result = match &self.context {
			Some(context) if self.background => context.on_leaving_background(),
			_ => Ok(()),
		};
		self.background = false;
		result
	}

	fn transition(&mut self, next: LifecycleState) {
		if self.state != next {
			tracing::debug!(from = ?self.state, to = ?next, "lifecycle.transition");
			self.state = next;
		}
	}
}
