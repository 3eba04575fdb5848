use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::sync::atomic::Ordering;

use crate::QueueRole;
use crate::queue::{MessageQueue, QueueShared};

/// Snapshot of one registered queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
	pub name: String,
	pub role: QueueRole,
	pub pending: usize,
	pub closed: bool,
}

/// In-memory queue registry for status snapshots.
///
/// Holds weak references, so registration never keeps a queue alive.
#[derive(Debug, Default, Clone)]
pub struct QueueRegistry {
	inner: Arc<RwLock<HashMap<String, Weak<QueueShared>>>>,
}

impl QueueRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers (or replaces) the queue under its name.
	pub fn register(&self, queue: &MessageQueue) {
		if let Ok(mut guard) = self.inner.write() {
			guard.insert(queue.name().to_string(), Arc::downgrade(queue.shared()));
		}
	}

	/// Removes one record.
	pub fn remove(&self, name: &str) {
		if let Ok(mut guard) = self.inner.write() {
			guard.remove(name);
		}
	}

	/// Returns snapshots of live queues sorted by name. Dropped queues are skipped.
	pub fn snapshots(&self) -> Vec<QueueRecord> {
		let Ok(guard) = self.inner.read() else {
			return Vec::new();
		};
		let mut records: Vec<_> = guard
			.values()
			.filter_map(Weak::upgrade)
			.map(|shared| QueueRecord {
				name: shared.name.to_string(),
				role: shared.role,
				pending: shared.pending.load(Ordering::Acquire),
				closed: shared.closed.load(Ordering::Acquire),
			})
			.collect();
		records.sort_by(|a, b| a.name.cmp(&b.name));
		records
	}
}
