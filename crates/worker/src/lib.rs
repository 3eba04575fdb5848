//! Threading primitives for the trellis bridge.
//!
//! Provides dedicated-thread FIFO [`MessageQueue`]s, the per-instance
//! [`QueueConfiguration`] triple, and the generation-scoped cancellation used to supersede
//! in-flight context creation.

mod config;
mod queue;
mod registry;
mod role;
mod spawn;
mod token;

use std::any::Any;

pub use config::{QueueConfiguration, QueueOptions};
pub use queue::{DEFAULT_SHUTDOWN_ACK_TIMEOUT, MessageQueue, QueueError, QueueErrorHandler, QueueSpec};
pub use registry::{QueueRecord, QueueRegistry};
pub use role::QueueRole;
pub use spawn::{spawn, spawn_named_thread};
pub use token::{GenerationClock, GenerationToken, SupersedingCancellation};

/// Extracts a human-readable message from a panic payload.
///
/// Returns `None` when the payload is neither `&str` nor `String`.
pub fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
	if let Some(s) = payload.downcast_ref::<&str>() {
		Some((*s).to_string())
	} else {
		payload.downcast_ref::<String>().cloned()
	}
}
